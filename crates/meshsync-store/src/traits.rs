use async_trait::async_trait;
use tokio::sync::broadcast;

use meshsync_types::{Resource, ResourceKey, ResourceList, ResourceType};

use crate::error::StoreResult;
use crate::events::ResourceChangedEvent;
use crate::options::{CreateOptions, DeleteOptions, ListOptions, UpdateOptions};

/// Typed resource storage.
///
/// All implementations must satisfy these invariants:
/// - `(type, mesh, name)` is unique within a store.
/// - `version` is assigned by the store and changes on every accepted update.
/// - `update` and versioned `delete` fail with `Conflict` when the caller's
///   version is stale.
/// - Errors are classified so callers can tell `AlreadyExists` and `NotFound`
///   apart from backend failures.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new resource. Store-managed metadata on the input is ignored.
    async fn create(&self, resource: Resource, opts: CreateOptions) -> StoreResult<Resource>;

    /// Replace spec, status and labels of an existing resource.
    ///
    /// `resource.meta.version` must match the stored version.
    async fn update(&self, resource: Resource, opts: UpdateOptions) -> StoreResult<Resource>;

    /// Delete a resource and everything it owns.
    async fn delete(
        &self,
        resource_type: &ResourceType,
        key: &ResourceKey,
        opts: DeleteOptions,
    ) -> StoreResult<()>;

    async fn get(&self, resource_type: &ResourceType, key: &ResourceKey) -> StoreResult<Resource>;

    /// List resources of a type, ordered by key.
    async fn list(&self, resource_type: &ResourceType, opts: ListOptions)
        -> StoreResult<ResourceList>;
}

/// A batch of writes applied atomically.
///
/// Reads through the transaction observe its own uncommitted writes.
#[async_trait]
pub trait Transaction: ResourceStore {
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Entry point for transactional batches.
#[async_trait]
pub trait Transactions: Send + Sync {
    /// Start a transaction. `None` means the backend applies every write
    /// immediately and the caller should write to the store directly.
    async fn begin(&self) -> StoreResult<Option<Box<dyn Transaction>>>;
}

/// [`Transactions`] for backends without transaction support.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTransactions;

#[async_trait]
impl Transactions for NoTransactions {
    async fn begin(&self) -> StoreResult<Option<Box<dyn Transaction>>> {
        Ok(None)
    }
}

/// Source of store change notifications.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ResourceChangedEvent>;
}
