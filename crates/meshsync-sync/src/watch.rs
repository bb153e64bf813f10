//! Fan-out of store changes to provider sessions.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshsync_store::{ChangeFeed, Operation};
use meshsync_types::ResourceType;

const NOTIFY_BUFFER: usize = 256;

/// Converts store change events into per-type notifications.
///
/// One task runs per watched type; every session subscribes to the shared
/// notification channel and recomputes the snapshot of the notified type.
pub struct Watcher {
    notify: broadcast::Sender<ResourceType>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Start one watching task per type. Tasks stop when `cancel` fires or
    /// the change feed closes.
    pub fn start(
        feed: Arc<dyn ChangeFeed>,
        types: impl IntoIterator<Item = ResourceType>,
        cancel: CancellationToken,
    ) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_BUFFER);
        let tasks = types
            .into_iter()
            .map(|resource_type| {
                let events = feed.subscribe();
                tokio::spawn(watch_type(resource_type, events, notify.clone(), cancel.clone()))
            })
            .collect();
        Self { notify, tasks }
    }

    /// Receiver of change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceType> {
        self.notify.subscribe()
    }

    pub fn watched_types(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("tasks", &self.tasks.len())
            .field("sessions", &self.notify.receiver_count())
            .finish()
    }
}

async fn watch_type(
    resource_type: ResourceType,
    mut events: broadcast::Receiver<meshsync_store::ResourceChangedEvent>,
    notify: broadcast::Sender<ResourceType>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(event) if event.resource_type == resource_type => {
                tracing::trace!(
                    resource_type = %resource_type,
                    name = %event.key.name,
                    mesh = %event.key.mesh,
                    deleted = event.operation == Operation::Delete,
                    "resource changed"
                );
                // No session listening is not an error.
                let _ = notify.send(resource_type.clone());
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(resource_type = %resource_type, skipped, "change feed lagged");
                let _ = notify.send(resource_type.clone());
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use meshsync_store::{CreateOptions, InMemoryResourceStore, ResourceStore};
    use meshsync_types::{types, Resource, ResourceKey};
    use serde_json::json;

    #[tokio::test]
    async fn notifies_only_watched_types() {
        let store = InMemoryResourceStore::new();
        let cancel = CancellationToken::new();
        let watcher = Watcher::start(
            Arc::new(store.clone()),
            [ResourceType::from(types::MESH)],
            cancel.clone(),
        );
        let mut notifications = watcher.subscribe();

        store
            .create(
                Resource::new(types::ZONE, &ResourceKey::global("east"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();
        store
            .create(
                Resource::new(types::MESH, &ResourceKey::global("default"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let notified = tokio::time::timeout(Duration::from_secs(1), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notified, ResourceType::from(types::MESH));
        assert!(notifications.try_recv().is_err());
        cancel.cancel();
    }
}
