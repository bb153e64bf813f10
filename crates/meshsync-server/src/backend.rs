use std::sync::Arc;

use meshsync_store::{ChangeFeed, InMemoryResourceStore, ResourceStore, Transactions};
use meshsync_sync::StoreSyncer;
use meshsync_types::TypeRegistry;

/// The storage a control plane replicates from and into.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ResourceStore>,
    pub transactions: Arc<dyn Transactions>,
    pub changes: Arc<dyn ChangeFeed>,
}

impl Backend {
    pub fn in_memory(store: InMemoryResourceStore) -> Self {
        let store = Arc::new(store);
        Self {
            store: store.clone(),
            transactions: store.clone(),
            changes: store,
        }
    }

    pub fn syncer(&self, registry: Arc<TypeRegistry>) -> Arc<StoreSyncer> {
        Arc::new(StoreSyncer::new(
            self.store.clone(),
            self.transactions.clone(),
            registry,
        ))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
