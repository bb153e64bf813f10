use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use meshsync_types::{Resource, ResourceKey, ResourceList, ResourceMeta, ResourceType};

use crate::error::{StoreError, StoreResult};
use crate::events::{Operation, ResourceChangedEvent};
use crate::options::{CreateOptions, DeleteOptions, ListOptions, OwnerRef, UpdateOptions};
use crate::traits::{ChangeFeed, ResourceStore, Transaction, Transactions};

const EVENT_BUFFER: usize = 1024;

#[derive(Clone, Debug)]
struct Record {
    resource: Resource,
    owner: Option<OwnerRef>,
}

/// Committed contents of the store.
#[derive(Clone, Debug, Default)]
struct State {
    records: BTreeMap<(ResourceType, ResourceKey), Record>,
    last_version: u64,
}

/// A write recorded by a transaction, replayed against the committed state
/// on commit.
#[derive(Clone, Debug)]
enum Op {
    Create(Resource, CreateOptions, DateTime<Utc>),
    Update(Resource, UpdateOptions, DateTime<Utc>),
    Delete(ResourceType, ResourceKey, DeleteOptions),
}

impl State {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn get(&self, resource_type: &ResourceType, key: &ResourceKey) -> StoreResult<Resource> {
        self.records
            .get(&(resource_type.clone(), key.clone()))
            .map(|r| r.resource.clone())
            .ok_or_else(|| StoreError::not_found(resource_type, key))
    }

    fn list(&self, resource_type: &ResourceType, opts: &ListOptions) -> StoreResult<ResourceList> {
        let mut list = ResourceList::new(resource_type.clone());
        let matching = self
            .records
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .filter(|(_, rec)| opts.matches(&rec.resource, rec.owner.as_ref()));
        for (_, rec) in matching {
            list.push(rec.resource.clone())?;
        }
        Ok(list)
    }

    fn create(
        &mut self,
        resource: Resource,
        opts: &CreateOptions,
        now: DateTime<Utc>,
    ) -> StoreResult<(Resource, ResourceChangedEvent)> {
        if resource.name().is_empty() {
            return Err(StoreError::Invalid("name must not be empty".into()));
        }
        let id = (resource.resource_type.clone(), resource.key());
        if self.records.contains_key(&id) {
            return Err(StoreError::already_exists(&id.0, &id.1));
        }
        if let Some(owner) = &opts.owner {
            let owner_id = (owner.resource_type.clone(), owner.key.clone());
            if !self.records.contains_key(&owner_id) {
                return Err(StoreError::OwnerNotFound {
                    resource_type: owner.resource_type.clone(),
                    key: owner.key.clone(),
                });
            }
        }

        let version = self.next_version();
        let Resource {
            resource_type,
            meta,
            spec,
            status,
        } = resource;
        let stored = Resource {
            resource_type,
            meta: ResourceMeta {
                labels: opts.labels.clone().unwrap_or(meta.labels),
                version: version.clone(),
                creation_time: opts.creation_time.unwrap_or(now),
                modification_time: now,
                name: meta.name,
                mesh: meta.mesh,
            },
            spec,
            status,
        };
        self.records.insert(
            id.clone(),
            Record {
                resource: stored.clone(),
                owner: opts.owner.clone(),
            },
        );
        let event = ResourceChangedEvent::new(Operation::Create, id.0, id.1, version);
        Ok((stored, event))
    }

    fn update(
        &mut self,
        resource: Resource,
        opts: &UpdateOptions,
        now: DateTime<Utc>,
    ) -> StoreResult<(Resource, ResourceChangedEvent)> {
        let id = (resource.resource_type.clone(), resource.key());
        let current_version = match self.records.get(&id) {
            Some(rec) => rec.resource.meta.version.clone(),
            None => return Err(StoreError::not_found(&id.0, &id.1)),
        };
        if current_version != resource.meta.version {
            return Err(StoreError::Conflict {
                resource_type: id.0,
                key: id.1,
                expected: resource.meta.version,
                actual: current_version,
            });
        }

        let version = self.next_version();
        let Some(rec) = self.records.get_mut(&id) else {
            return Err(StoreError::not_found(&id.0, &id.1));
        };
        let meta = &mut rec.resource.meta;
        meta.labels = opts.labels.clone().unwrap_or(resource.meta.labels);
        meta.version = version.clone();
        meta.modification_time = opts.modification_time.unwrap_or(now);
        rec.resource.spec = resource.spec;
        rec.resource.status = resource.status;

        let stored = rec.resource.clone();
        let event = ResourceChangedEvent::new(Operation::Update, id.0, id.1, version);
        Ok((stored, event))
    }

    fn delete(
        &mut self,
        resource_type: &ResourceType,
        key: &ResourceKey,
        opts: &DeleteOptions,
    ) -> StoreResult<Vec<ResourceChangedEvent>> {
        let id = (resource_type.clone(), key.clone());
        let Some(rec) = self.records.get(&id) else {
            return Err(StoreError::not_found(resource_type, key));
        };
        if let Some(expected) = &opts.version {
            if *expected != rec.resource.meta.version {
                return Err(StoreError::Conflict {
                    resource_type: resource_type.clone(),
                    key: key.clone(),
                    expected: expected.clone(),
                    actual: rec.resource.meta.version.clone(),
                });
            }
        }

        let mut events = Vec::new();
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if self.records.remove(&id).is_none() {
                continue;
            }
            let owner = OwnerRef::new(id.0.clone(), id.1.clone());
            pending.extend(
                self.records
                    .iter()
                    .filter(|(_, r)| r.owner.as_ref() == Some(&owner))
                    .map(|(child, _)| child.clone()),
            );
            events.push(ResourceChangedEvent::new(Operation::Delete, id.0, id.1, ""));
        }
        Ok(events)
    }

    fn apply(&mut self, op: Op) -> StoreResult<Vec<ResourceChangedEvent>> {
        match op {
            Op::Create(resource, opts, now) => self.create(resource, &opts, now).map(|(_, e)| vec![e]),
            Op::Update(resource, opts, now) => self.update(resource, &opts, now).map(|(_, e)| vec![e]),
            Op::Delete(t, key, opts) => self.delete(&t, &key, &opts),
        }
    }
}

struct Inner {
    state: RwLock<State>,
    events: broadcast::Sender<ResourceChangedEvent>,
}

impl Inner {
    fn publish(&self, events: impl IntoIterator<Item = ResourceChangedEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

/// In-memory, `BTreeMap`-based resource store.
///
/// Intended for tests and embedding. Cloning yields another handle to the
/// same store. Versions are a per-store counter rendered as a decimal string.
#[derive(Clone)]
pub struct InMemoryResourceStore {
    inner: Arc<Inner>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                events,
            }),
        }
    }

    /// Total number of resources across all types.
    pub fn len(&self) -> usize {
        self.inner.state.read().expect("lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resources of one type.
    pub fn count(&self, resource_type: &ResourceType) -> usize {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .records
            .keys()
            .filter(|(t, _)| t == resource_type)
            .count()
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryResourceStore")
            .field("resource_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn create(&self, resource: Resource, opts: CreateOptions) -> StoreResult<Resource> {
        let (stored, event) = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            state.create(resource, &opts, Utc::now())?
        };
        self.inner.publish([event]);
        Ok(stored)
    }

    async fn update(&self, resource: Resource, opts: UpdateOptions) -> StoreResult<Resource> {
        let (stored, event) = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            state.update(resource, &opts, Utc::now())?
        };
        self.inner.publish([event]);
        Ok(stored)
    }

    async fn delete(
        &self,
        resource_type: &ResourceType,
        key: &ResourceKey,
        opts: DeleteOptions,
    ) -> StoreResult<()> {
        let events = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            state.delete(resource_type, key, &opts)?
        };
        self.inner.publish(events);
        Ok(())
    }

    async fn get(&self, resource_type: &ResourceType, key: &ResourceKey) -> StoreResult<Resource> {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .get(resource_type, key)
    }

    async fn list(
        &self,
        resource_type: &ResourceType,
        opts: ListOptions,
    ) -> StoreResult<ResourceList> {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .list(resource_type, &opts)
    }
}

#[async_trait]
impl Transactions for InMemoryResourceStore {
    async fn begin(&self) -> StoreResult<Option<Box<dyn Transaction>>> {
        let working = self.inner.state.read().expect("lock poisoned").clone();
        Ok(Some(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            pending: Mutex::new(Pending {
                working,
                ops: Vec::new(),
            }),
        })))
    }
}

impl ChangeFeed for InMemoryResourceStore {
    fn subscribe(&self) -> broadcast::Receiver<ResourceChangedEvent> {
        self.inner.events.subscribe()
    }
}

struct Pending {
    working: State,
    ops: Vec<Op>,
}

/// Transaction over an [`InMemoryResourceStore`].
///
/// Writes are applied to a private copy so errors surface immediately, and
/// recorded. Commit replays the recorded writes against the committed state
/// and installs the result only if every write still succeeds.
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    pending: Mutex<Pending>,
}

#[async_trait]
impl ResourceStore for MemoryTransaction {
    async fn create(&self, resource: Resource, opts: CreateOptions) -> StoreResult<Resource> {
        let now = Utc::now();
        let mut pending = self.pending.lock().expect("lock poisoned");
        let (stored, _) = pending.working.create(resource.clone(), &opts, now)?;
        pending.ops.push(Op::Create(resource, opts, now));
        Ok(stored)
    }

    async fn update(&self, resource: Resource, opts: UpdateOptions) -> StoreResult<Resource> {
        let now = Utc::now();
        let mut pending = self.pending.lock().expect("lock poisoned");
        let (stored, _) = pending.working.update(resource.clone(), &opts, now)?;
        pending.ops.push(Op::Update(resource, opts, now));
        Ok(stored)
    }

    async fn delete(
        &self,
        resource_type: &ResourceType,
        key: &ResourceKey,
        opts: DeleteOptions,
    ) -> StoreResult<()> {
        let mut pending = self.pending.lock().expect("lock poisoned");
        pending.working.delete(resource_type, key, &opts)?;
        pending
            .ops
            .push(Op::Delete(resource_type.clone(), key.clone(), opts));
        Ok(())
    }

    async fn get(&self, resource_type: &ResourceType, key: &ResourceKey) -> StoreResult<Resource> {
        self.pending
            .lock()
            .expect("lock poisoned")
            .working
            .get(resource_type, key)
    }

    async fn list(
        &self,
        resource_type: &ResourceType,
        opts: ListOptions,
    ) -> StoreResult<ResourceList> {
        self.pending
            .lock()
            .expect("lock poisoned")
            .working
            .list(resource_type, &opts)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { inner, pending } = *self;
        let Pending { ops, .. } = pending.into_inner().expect("lock poisoned");
        let op_count = ops.len();
        let events = {
            let mut state = inner.state.write().expect("lock poisoned");
            let mut next = state.clone();
            let mut events = Vec::new();
            for op in ops {
                let applied = next
                    .apply(op)
                    .map_err(|e| StoreError::Transaction(e.to_string()))?;
                events.extend(applied);
            }
            *state = next;
            events
        };
        tracing::trace!(ops = op_count, "memory transaction committed");
        inner.publish(events);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let ops = self.pending.lock().expect("lock poisoned").ops.len();
        tracing::trace!(ops, "memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mesh(name: &str) -> Resource {
        Resource::new("Mesh", &ResourceKey::global(name), json!({"mtls": false}))
    }

    fn dp(name: &str) -> Resource {
        Resource::new(
            "Dataplane",
            &ResourceKey::new("default", name),
            json!({"networking": {"address": "10.0.0.1"}}),
        )
    }

    fn mesh_type() -> ResourceType {
        ResourceType::from("Mesh")
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_assigns_store_meta() {
        let store = InMemoryResourceStore::new();
        let mut input = mesh("default");
        input.meta.version = "upstream-7".into();

        let created = store.create(input, CreateOptions::default()).await.unwrap();
        assert_eq!(created.meta.version, "1");
        assert_eq!(created.meta.creation_time, created.meta.modification_time);

        let fetched = store.get(&mesh_type(), &ResourceKey::global("default")).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn create_duplicate_is_already_exists() {
        let store = InMemoryResourceStore::new();
        store.create(mesh("default"), CreateOptions::default()).await.unwrap();
        let err = store
            .create(mesh("default"), CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn create_applies_label_override() {
        let store = InMemoryResourceStore::new();
        let labels = [("team".to_string(), "core".to_string())].into_iter().collect();
        let created = store
            .create(
                mesh("default").with_labels([("ignored", "x")]),
                CreateOptions::default().with_labels(labels),
            )
            .await
            .unwrap();
        assert_eq!(created.label("team"), Some("core"));
        assert_eq!(created.label("ignored"), None);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryResourceStore::new();
        let err = store
            .get(&mesh_type(), &ResourceKey::global("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    // -----------------------------------------------------------------------
    // Optimistic versioning
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn update_bumps_version_and_keeps_creation_time() {
        let store = InMemoryResourceStore::new();
        let created = store.create(mesh("default"), CreateOptions::default()).await.unwrap();

        let mut changed = created.clone();
        changed.spec = json!({"mtls": true});
        let updated = store.update(changed, UpdateOptions::default()).await.unwrap();

        assert_ne!(updated.meta.version, created.meta.version);
        assert_eq!(updated.meta.creation_time, created.meta.creation_time);
        assert_eq!(updated.spec, json!({"mtls": true}));
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryResourceStore::new();
        let created = store.create(mesh("default"), CreateOptions::default()).await.unwrap();
        store.update(created.clone(), UpdateOptions::default()).await.unwrap();

        let err = store.update(created, UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = InMemoryResourceStore::new();
        let err = store
            .update(mesh("ghost"), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn versioned_delete() {
        let store = InMemoryResourceStore::new();
        let created = store.create(mesh("default"), CreateOptions::default()).await.unwrap();
        let key = created.key();

        let stale = DeleteOptions {
            version: Some("999".into()),
        };
        assert!(store.delete(&mesh_type(), &key, stale).await.unwrap_err().is_conflict());

        let current = DeleteOptions {
            version: Some(created.meta.version.clone()),
        };
        store.delete(&mesh_type(), &key, current).await.unwrap();
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_filters_by_type_and_keys() {
        let store = InMemoryResourceStore::new();
        for name in ["a", "b", "c"] {
            store.create(mesh(name), CreateOptions::default()).await.unwrap();
        }
        store.create(dp("web"), CreateOptions::default()).await.unwrap();

        let all = store.list(&mesh_type(), ListOptions::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let subset = store
            .list(
                &mesh_type(),
                ListOptions::default()
                    .with_keys([ResourceKey::global("a"), ResourceKey::global("zzz")]),
            )
            .await
            .unwrap();
        assert_eq!(subset.keys(), vec![ResourceKey::global("a")]);
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_with_missing_owner_fails() {
        let store = InMemoryResourceStore::new();
        let owner = OwnerRef::new("Zone", ResourceKey::global("east"));
        let err = store
            .create(dp("web"), CreateOptions::default().with_owner(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OwnerNotFound { .. }));
    }

    #[tokio::test]
    async fn deleting_owner_cascades() {
        let store = InMemoryResourceStore::new();
        let zone = Resource::new("Zone", &ResourceKey::global("east"), json!({}));
        let zone = store.create(zone, CreateOptions::default()).await.unwrap();
        let owner = OwnerRef::of(&zone);

        store
            .create(dp("web"), CreateOptions::default().with_owner(owner.clone()))
            .await
            .unwrap();
        store.create(dp("api"), CreateOptions::default()).await.unwrap();

        let owned = store
            .list(&"Dataplane".into(), ListOptions::default().owned_by(owner))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);

        store
            .delete(&"Zone".into(), &zone.key(), DeleteOptions::default())
            .await
            .unwrap();
        assert_eq!(store.count(&"Dataplane".into()), 1);
        assert!(store
            .get(&"Dataplane".into(), &ResourceKey::new("default", "api"))
            .await
            .is_ok());
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn transaction_is_invisible_until_commit() {
        let store = InMemoryResourceStore::new();
        let tx = store.begin().await.unwrap().expect("memory store supports transactions");
        tx.create(mesh("a"), CreateOptions::default()).await.unwrap();

        assert!(tx.get(&mesh_type(), &ResourceKey::global("a")).await.is_ok());
        assert!(store.is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.count(&mesh_type()), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = InMemoryResourceStore::new();
        store.create(mesh("keep"), CreateOptions::default()).await.unwrap();

        let tx = store.begin().await.unwrap().unwrap();
        tx.delete(&mesh_type(), &ResourceKey::global("keep"), DeleteOptions::default())
            .await
            .unwrap();
        tx.create(mesh("new"), CreateOptions::default()).await.unwrap();
        tx.rollback().await.unwrap();

        let names: Vec<_> = store
            .list(&mesh_type(), ListOptions::default())
            .await
            .unwrap()
            .keys();
        assert_eq!(names, vec![ResourceKey::global("keep")]);
    }

    #[tokio::test]
    async fn commit_fails_on_intervening_conflict() {
        let store = InMemoryResourceStore::new();
        let tx = store.begin().await.unwrap().unwrap();
        tx.create(mesh("a"), CreateOptions::default()).await.unwrap();

        store.create(mesh("a"), CreateOptions::default()).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
        assert_eq!(store.count(&mesh_type()), 1);
    }

    #[tokio::test]
    async fn unrelated_writes_do_not_block_commit() {
        let store = InMemoryResourceStore::new();
        let tx = store.begin().await.unwrap().unwrap();
        tx.create(mesh("a"), CreateOptions::default()).await.unwrap();

        store.create(mesh("b"), CreateOptions::default()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.count(&mesh_type()), 2);
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn mutations_are_published() {
        let store = InMemoryResourceStore::new();
        let mut rx = store.subscribe();

        let created = store.create(mesh("a"), CreateOptions::default()).await.unwrap();
        store.update(created, UpdateOptions::default()).await.unwrap();
        store
            .delete(&mesh_type(), &ResourceKey::global("a"), DeleteOptions::default())
            .await
            .unwrap();

        let ops: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().operation).collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Update, Operation::Delete]);
    }

    #[tokio::test]
    async fn transaction_events_are_published_on_commit() {
        let store = InMemoryResourceStore::new();
        let mut rx = store.subscribe();

        let tx = store.begin().await.unwrap().unwrap();
        tx.create(mesh("a"), CreateOptions::default()).await.unwrap();
        assert!(rx.try_recv().is_err());

        tx.commit().await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.key, ResourceKey::global("a"));
    }
}
