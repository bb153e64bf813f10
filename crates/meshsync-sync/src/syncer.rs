//! Reconciliation of upstream change sets into the local store.
//!
//! A reconciliation reads the local state it needs, computes the difference
//! against the upstream change set and writes the minimal set of mutations.
//! It holds no state between calls, so it is safe to re-run after a crash.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;

use meshsync_store::{
    CreateOptions, DeleteOptions, ListOptions, OwnerRef, ResourceStore, Transactions,
    UpdateOptions,
};
use meshsync_types::{Resource, ResourceKey, ResourceMeta, TypeRegistry};

use crate::error::{Rejection, RejectionCause, SyncResult};
use crate::metrics;
use crate::options::SyncOptions;
use crate::upstream::UpstreamResponse;

/// Outcome of a reconciliation that did not fail fatally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<ResourceKey>,
    pub updated: Vec<ResourceKey>,
    pub deleted: Vec<ResourceKey>,
    /// Resources that were not applied. Everything else was.
    pub rejection: Option<Rejection>,
}

impl SyncReport {
    /// Number of store mutations issued.
    pub fn mutations(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Applies upstream change sets to a store.
///
/// `Err` means the connection must be torn down. A rejection in the report
/// means some resources were refused but the rest was applied.
#[async_trait]
pub trait ResourceSyncer: Send + Sync {
    async fn sync(&self, upstream: UpstreamResponse, opts: SyncOptions) -> SyncResult<SyncReport>;
}

/// Mutations computed for one change set.
#[derive(Debug, Default)]
struct Plan {
    delete: Vec<Resource>,
    create: Vec<Resource>,
    update: Vec<(Resource, Resource)>,
}

/// [`ResourceSyncer`] backed by a [`ResourceStore`].
pub struct StoreSyncer {
    store: Arc<dyn ResourceStore>,
    transactions: Arc<dyn Transactions>,
    registry: Arc<TypeRegistry>,
}

impl StoreSyncer {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        transactions: Arc<dyn Transactions>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            store,
            transactions,
            registry,
        }
    }

    fn plan(
        &self,
        upstream: UpstreamResponse,
        downstream: Vec<Resource>,
        opts: &SyncOptions,
        rejection: &mut Rejection,
    ) -> SyncResult<Plan> {
        let descriptor = self.registry.descriptor(&upstream.resource_type)?;

        let mut invalid = BTreeSet::new();
        let mut wanted: BTreeMap<ResourceKey, Resource> = BTreeMap::new();
        for resource in upstream.added.into_items() {
            if !opts.selects(&resource) {
                continue;
            }
            if let Err(e) = descriptor.validate(&resource) {
                let key = resource.key();
                rejection.push(RejectionCause {
                    resource_type: upstream.resource_type.clone(),
                    key: key.clone(),
                    reason: e.to_string(),
                });
                invalid.insert(key);
                continue;
            }
            wanted.insert(resource.key(), resource);
        }

        // The local copy of a rejected resource is left as it is.
        let local: BTreeMap<ResourceKey, Resource> = downstream
            .into_iter()
            .filter(|r| opts.selects(r))
            .map(|r| (r.key(), r))
            .filter(|(k, _)| !invalid.contains(k))
            .collect();

        let mut plan = Plan::default();
        if upstream.is_initial {
            plan.delete = local
                .iter()
                .filter(|(k, _)| !wanted.contains_key(*k))
                .map(|(_, r)| r.clone())
                .collect();
        } else {
            let removed: BTreeSet<ResourceKey> = upstream.removed.into_iter().collect();
            plan.delete = removed
                .iter()
                .filter(|k| !wanted.contains_key(*k))
                .filter_map(|k| local.get(k).cloned())
                .collect();
        }

        for (key, resource) in wanted {
            match local.get(&key) {
                None => plan.create.push(resource),
                Some(existing) if !existing.same_content(&resource) => {
                    plan.update.push((resource, existing.clone()));
                }
                Some(_) => {}
            }
        }
        Ok(plan)
    }

    async fn apply<S>(
        &self,
        target: &S,
        plan: Plan,
        owner: Option<&OwnerRef>,
        opts: &SyncOptions,
        report: &mut SyncReport,
        rejection: &mut Rejection,
    ) -> SyncResult<()>
    where
        S: ResourceStore + ?Sized,
    {
        for resource in plan.delete {
            let key = resource.key();
            tracing::info!(
                resource_type = %resource.resource_type,
                name = %key.name,
                mesh = %key.mesh,
                "deleting a resource since it's no longer available in the upstream"
            );
            match target
                .delete(&resource.resource_type, &key, DeleteOptions::default())
                .await
            {
                Ok(()) => report.deleted.push(key),
                // Already gone with its owner.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        for resource in plan.create {
            let key = resource.key();
            tracing::info!(
                resource_type = %resource.resource_type,
                name = %key.name,
                mesh = %key.mesh,
                "creating a new resource from upstream"
            );
            let mut create_opts = CreateOptions::default()
                .with_labels(resource.meta.labels.clone())
                .created_at(Utc::now());
            if let Some(owner) = owner {
                create_opts = create_opts.with_owner(owner.clone());
            }
            let fresh = Resource {
                resource_type: resource.resource_type.clone(),
                meta: ResourceMeta::for_key(&key),
                spec: resource.spec,
                status: resource.status,
            };
            match target.create(fresh, create_opts).await {
                Ok(_) => report.created.push(key),
                Err(e) if opts.skip_conflicts && e.is_already_exists() => {
                    tracing::warn!(
                        resource_type = %resource.resource_type,
                        name = %key.name,
                        mesh = %key.mesh,
                        "resource already exists, skipping"
                    );
                    rejection.push(RejectionCause {
                        resource_type: resource.resource_type,
                        key,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        for (resource, existing) in plan.update {
            let key = resource.key();
            tracing::debug!(
                resource_type = %resource.resource_type,
                name = %key.name,
                mesh = %key.mesh,
                "updating a resource"
            );
            let update_opts = UpdateOptions::default()
                .with_labels(resource.meta.labels)
                .modified_at(Utc::now());
            let next = Resource {
                meta: existing.meta,
                spec: resource.spec,
                status: resource.status,
                resource_type: existing.resource_type,
            };
            target.update(next, update_opts).await?;
            report.updated.push(key);
        }
        Ok(())
    }

    async fn run(&self, upstream: UpstreamResponse, opts: SyncOptions) -> SyncResult<SyncReport> {
        let resource_type = upstream.resource_type.clone();
        tracing::debug!(
            resource_type = %resource_type,
            initial = upstream.is_initial,
            added = upstream.added.len(),
            removed = upstream.removed.len(),
            "syncing resources"
        );

        let scope = if upstream.is_initial {
            ListOptions::default()
        } else {
            ListOptions::default().with_keys(upstream.touched_keys())
        };
        let downstream = self.store.list(&resource_type, scope).await?.into_items();

        let mut rejection = Rejection::default();
        let plan = self.plan(upstream, downstream, &opts, &mut rejection)?;
        let mut report = SyncReport::default();

        // The owner only has to exist when something is attached to it.
        let owner = match &opts.owner {
            Some(owner) if !plan.create.is_empty() => {
                self.store.get(&owner.resource_type, &owner.key).await?;
                Some(owner.clone())
            }
            _ => None,
        };

        match self.transactions.begin().await? {
            Some(tx) => {
                let applied = self
                    .apply(tx.as_ref(), plan, owner.as_ref(), &opts, &mut report, &mut rejection)
                    .await;
                match applied {
                    Ok(()) => tx.commit().await?,
                    Err(e) => {
                        if let Err(rollback) = tx.rollback().await {
                            tracing::error!(
                                resource_type = %resource_type,
                                error = %rollback,
                                "failed to roll back sync transaction"
                            );
                        }
                        return Err(e);
                    }
                }
            }
            None => {
                self.apply(
                    self.store.as_ref(),
                    plan,
                    owner.as_ref(),
                    &opts,
                    &mut report,
                    &mut rejection,
                )
                .await?
            }
        }

        report.rejection = rejection.into_option();
        Ok(report)
    }
}

#[async_trait]
impl ResourceSyncer for StoreSyncer {
    async fn sync(&self, upstream: UpstreamResponse, opts: SyncOptions) -> SyncResult<SyncReport> {
        let resource_type = upstream.resource_type.clone();
        let started = Instant::now();
        let result = self.run(upstream, opts).await;
        metrics::record_sync(&resource_type, started.elapsed());
        result
    }
}

impl std::fmt::Debug for StoreSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSyncer")
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_store::{
        InMemoryResourceStore, NoTransactions, StoreError, StoreResult,
    };
    use meshsync_types::{types, ResourceList, ResourceType};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::error::SyncError;

    fn dp(name: &str, address: &str) -> Resource {
        Resource::new(
            types::DATAPLANE,
            &ResourceKey::new("default", name),
            json!({"networking": {"address": address}}),
        )
    }

    fn dp_type() -> ResourceType {
        types::DATAPLANE.into()
    }

    fn list(items: Vec<Resource>) -> ResourceList {
        ResourceList::from_items(types::DATAPLANE, items).unwrap()
    }

    fn syncer_for(store: &InMemoryResourceStore) -> StoreSyncer {
        StoreSyncer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(TypeRegistry::builtin()),
        )
    }

    async fn seed(store: &InMemoryResourceStore, resources: Vec<Resource>) {
        for r in resources {
            store.create(r, CreateOptions::default()).await.unwrap();
        }
    }

    async fn names(store: &InMemoryResourceStore) -> Vec<String> {
        store
            .list(&dp_type(), ListOptions::default())
            .await
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    async fn get(store: &InMemoryResourceStore, name: &str) -> Resource {
        store
            .get(&dp_type(), &ResourceKey::new("default", name))
            .await
            .unwrap()
    }

    /// Store that fails every call.
    struct UnavailableStore;

    #[async_trait]
    impl ResourceStore for UnavailableStore {
        async fn create(&self, _: Resource, _: CreateOptions) -> StoreResult<Resource> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn update(&self, _: Resource, _: UpdateOptions) -> StoreResult<Resource> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn delete(&self, _: &ResourceType, _: &ResourceKey, _: DeleteOptions) -> StoreResult<()> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get(&self, _: &ResourceType, _: &ResourceKey) -> StoreResult<Resource> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn list(&self, _: &ResourceType, _: ListOptions) -> StoreResult<ResourceList> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot and delta semantics
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn initial_response_is_complete() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1"), dp("b", "10.0.0.2"), dp("c", "10.0.0.3")]).await;
        let b_before = get(&store, "b").await;

        let upstream = UpstreamResponse::initial(
            "global",
            list(vec![dp("b", "10.0.1.2"), dp("d", "10.0.0.4")]),
        );
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(names(&store).await, vec!["b", "d"]);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.created, vec![ResourceKey::new("default", "d")]);
        assert_eq!(report.updated, vec![ResourceKey::new("default", "b")]);
        assert!(report.rejection.is_none());

        let b_after = get(&store, "b").await;
        assert_eq!(b_after.spec, json!({"networking": {"address": "10.0.1.2"}}));
        assert_eq!(b_after.meta.creation_time, b_before.meta.creation_time);
        assert_ne!(b_after.meta.version, b_before.meta.version);
    }

    #[tokio::test]
    async fn incremental_deletes_are_explicit() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1"), dp("b", "10.0.0.2")]).await;

        let upstream =
            UpstreamResponse::delta("global", list(vec![]), vec![ResourceKey::new("default", "a")]);
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(names(&store).await, vec!["b"]);
        assert_eq!(report.deleted, vec![ResourceKey::new("default", "a")]);
    }

    #[tokio::test]
    async fn incremental_add_leaves_unmentioned_resources() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1")]).await;

        let upstream = UpstreamResponse::delta("global", list(vec![dp("b", "10.0.0.2")]), vec![]);
        syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(names(&store).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn removed_and_readded_key_is_updated_not_deleted() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1")]).await;

        let upstream = UpstreamResponse::delta(
            "global",
            list(vec![dp("a", "10.0.0.9")]),
            vec![ResourceKey::new("default", "a")],
        );
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.updated, vec![ResourceKey::new("default", "a")]);
        assert_eq!(
            get(&store, "a").await.spec,
            json!({"networking": {"address": "10.0.0.9"}})
        );
    }

    #[tokio::test]
    async fn unchanged_resource_keeps_its_version() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1").with_labels([("team", "core")])]).await;
        let before = get(&store, "a").await;

        let upstream = UpstreamResponse::initial(
            "global",
            list(vec![dp("a", "10.0.0.1").with_labels([("team", "core")])]),
        );
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(report.mutations(), 0);
        assert_eq!(get(&store, "a").await.meta.version, before.meta.version);
    }

    #[tokio::test]
    async fn label_change_triggers_update() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1")]).await;

        let upstream = UpstreamResponse::initial(
            "global",
            list(vec![dp("a", "10.0.0.1").with_labels([("team", "core")])]),
        );
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(report.updated.len(), 1);
        assert_eq!(get(&store, "a").await.label("team"), Some("core"));
    }

    #[tokio::test]
    async fn create_discards_upstream_meta() {
        let store = InMemoryResourceStore::new();
        let mut upstream_dp = dp("a", "10.0.0.1");
        upstream_dp.meta.version = "upstream-42".into();

        let upstream = UpstreamResponse::initial("global", list(vec![upstream_dp]));
        syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_ne!(get(&store, "a").await.meta.version, "upstream-42");
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn invalid_resource_does_not_block_the_rest() {
        let store = InMemoryResourceStore::new();
        let upstream = UpstreamResponse::initial(
            "global",
            list(vec![dp("valid-1", "10.0.0.1"), dp("invalid-1", ""), dp("valid-2", "10.0.0.2")]),
        );
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert_eq!(names(&store).await, vec!["valid-1", "valid-2"]);
        let rejection = report.rejection.expect("invalid resource is rejected");
        assert_eq!(rejection.len(), 1);
        assert!(rejection.names(&ResourceKey::new("default", "invalid-1")));
        assert!(rejection.to_string().contains("invalid-1"));
    }

    #[tokio::test]
    async fn invalid_update_keeps_previous_local_copy() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1")]).await;

        let upstream = UpstreamResponse::initial("global", list(vec![dp("a", "")]));
        let report = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap();

        assert!(report.is_rejected());
        assert!(report.deleted.is_empty());
        assert_eq!(
            get(&store, "a").await.spec,
            json!({"networking": {"address": "10.0.0.1"}})
        );
    }

    #[tokio::test]
    async fn create_conflicts_accumulate_when_tolerated() {
        let store = InMemoryResourceStore::new();
        // Authored locally, hidden from the reconciliation by the prefilter.
        seed(&store, vec![dp("a", "10.0.0.1"), dp("b", "10.0.0.2")]).await;

        let upstream = UpstreamResponse::initial(
            "east",
            list(vec![
                dp("a", "10.1.0.1").with_labels([("meshsync.io/zone", "east")]),
                dp("b", "10.1.0.2").with_labels([("meshsync.io/zone", "east")]),
                dp("c", "10.1.0.3").with_labels([("meshsync.io/zone", "east")]),
            ]),
        );
        let opts = SyncOptions::new()
            .prefilter_by(|r| r.label("meshsync.io/zone") == Some("east"))
            .skip_conflicts(true);
        let report = syncer_for(&store).sync(upstream, opts).await.unwrap();

        assert_eq!(report.created, vec![ResourceKey::new("default", "c")]);
        let rejection = report.rejection.unwrap();
        assert_eq!(rejection.len(), 2);
        assert!(rejection.names(&ResourceKey::new("default", "a")));
        assert!(rejection.names(&ResourceKey::new("default", "b")));
        assert_eq!(get(&store, "a").await.spec, json!({"networking": {"address": "10.0.0.1"}}));
    }

    // -----------------------------------------------------------------------
    // Fatal errors and transactions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn untolerated_conflict_is_fatal_and_rolls_back() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("stale", "10.0.0.1").with_labels([("meshsync.io/zone", "east")])]).await;
        seed(&store, vec![dp("taken", "10.0.0.2")]).await;

        let upstream = UpstreamResponse::initial(
            "east",
            list(vec![dp("taken", "10.1.0.2").with_labels([("meshsync.io/zone", "east")])]),
        );
        let opts = SyncOptions::new().prefilter_by(|r| r.label("meshsync.io/zone") == Some("east"));
        let err = syncer_for(&store).sync(upstream, opts).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(ref e) if e.is_already_exists()));
        // The delete that preceded the failed create was rolled back.
        assert_eq!(names(&store).await, vec!["stale", "taken"]);
    }

    #[tokio::test]
    async fn without_transactions_applied_writes_stay() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("stale", "10.0.0.1").with_labels([("meshsync.io/zone", "east")])]).await;
        seed(&store, vec![dp("taken", "10.0.0.2")]).await;

        let syncer = StoreSyncer::new(
            Arc::new(store.clone()),
            Arc::new(NoTransactions),
            Arc::new(TypeRegistry::builtin()),
        );
        let upstream = UpstreamResponse::initial(
            "east",
            list(vec![dp("taken", "10.1.0.2").with_labels([("meshsync.io/zone", "east")])]),
        );
        let opts = SyncOptions::new().prefilter_by(|r| r.label("meshsync.io/zone") == Some("east"));
        assert!(syncer.sync(upstream, opts).await.is_err());
        assert_eq!(names(&store).await, vec!["taken"]);
    }

    #[tokio::test]
    async fn unavailable_store_is_fatal() {
        let syncer = StoreSyncer::new(
            Arc::new(UnavailableStore),
            Arc::new(NoTransactions),
            Arc::new(TypeRegistry::builtin()),
        );
        let upstream = UpstreamResponse::initial("global", list(vec![dp("a", "10.0.0.1")]));
        let err = syncer.sync(upstream, SyncOptions::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unknown_type_is_fatal() {
        let store = InMemoryResourceStore::new();
        let upstream = UpstreamResponse::initial("global", ResourceList::new("Unknown"));
        let err = syncer_for(&store).sync(upstream, SyncOptions::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Type(_)));
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn created_resources_are_owned() {
        let store = InMemoryResourceStore::new();
        let zone = store
            .create(
                Resource::new(types::ZONE, &ResourceKey::global("east"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();
        let owner = OwnerRef::of(&zone);

        let upstream = UpstreamResponse::initial("east", list(vec![dp("a", "10.0.0.1")]));
        syncer_for(&store)
            .sync(upstream, SyncOptions::new().owned_by(owner.clone()))
            .await
            .unwrap();

        let owned = store
            .list(&dp_type(), ListOptions::default().owned_by(owner))
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);

        store
            .delete(&types::ZONE.into(), &zone.key(), DeleteOptions::default())
            .await
            .unwrap();
        assert!(names(&store).await.is_empty());
    }

    #[tokio::test]
    async fn missing_owner_is_fatal() {
        let store = InMemoryResourceStore::new();
        let owner = OwnerRef::new(types::ZONE, ResourceKey::global("ghost"));
        let upstream = UpstreamResponse::initial("ghost", list(vec![dp("a", "10.0.0.1")]));
        let err = syncer_for(&store)
            .sync(upstream, SyncOptions::new().owned_by(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(ref e) if e.is_not_found()));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn owner_is_not_needed_without_creates() {
        let store = InMemoryResourceStore::new();
        seed(&store, vec![dp("a", "10.0.0.1")]).await;
        let owner = OwnerRef::new(types::ZONE, ResourceKey::global("ghost"));

        let empty = UpstreamResponse::initial("ghost", ResourceList::new(types::DATAPLANE));
        let report = syncer_for(&store)
            .sync(empty, SyncOptions::new().owned_by(owner.clone()))
            .await
            .unwrap();
        assert_eq!(report.deleted, vec![ResourceKey::new("default", "a")]);
        assert!(report.created.is_empty());

        let delete_only = UpstreamResponse::delta(
            "ghost",
            ResourceList::new(types::DATAPLANE),
            vec![ResourceKey::new("default", "b")],
        );
        let report = syncer_for(&store)
            .sync(delete_only, SyncOptions::new().owned_by(owner))
            .await
            .unwrap();
        assert_eq!(report.mutations(), 0);
        assert!(!report.is_rejected());
    }

    // -----------------------------------------------------------------------
    // Idempotence
    // -----------------------------------------------------------------------

    fn arb_resources() -> impl Strategy<Value = Vec<(u8, u8)>> {
        prop::collection::vec((0u8..8, 0u8..3), 0..8)
    }

    fn to_dataplanes(spec: &[(u8, u8)]) -> Vec<Resource> {
        let mut seen = BTreeSet::new();
        spec.iter()
            .filter(|(name, _)| seen.insert(*name))
            .map(|(name, addr)| dp(&format!("dp-{name}"), &format!("10.0.0.{addr}")))
            .collect()
    }

    proptest! {
        #[test]
        fn second_sync_is_a_noop(
            local in arb_resources(),
            added in arb_resources(),
            removed in prop::collection::vec(0u8..8, 0..4),
            initial in any::<bool>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryResourceStore::new();
                seed(&store, to_dataplanes(&local)).await;
                let syncer = syncer_for(&store);

                let added = list(to_dataplanes(&added));
                let removed: Vec<_> = removed
                    .iter()
                    .map(|n| ResourceKey::new("default", format!("dp-{n}")))
                    .collect();
                let upstream = if initial {
                    UpstreamResponse::initial("global", added)
                } else {
                    UpstreamResponse::delta("global", added, removed)
                };

                syncer.sync(upstream.clone(), SyncOptions::new()).await.unwrap();
                let second = syncer.sync(upstream, SyncOptions::new()).await.unwrap();
                assert_eq!(second.mutations(), 0);
            });
        }
    }
}
