//! Consumer callbacks: how a control plane stores what it receives.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use meshsync_protocol::features::HASH_SUFFIX;
use meshsync_protocol::Features;
use meshsync_store::OwnerRef;
use meshsync_types::labels::{ORIGIN_LABEL, ZONE_LABEL};
use meshsync_types::{
    is_locally_originated, types, ControlPlaneMode, Origin, ResourceKey, TypeRegistry,
};

use crate::context::ZONE_TOKEN_SIGNING_PUBLIC_KEY_PREFIX;
use crate::error::SyncResult;
use crate::options::SyncOptions;
use crate::syncer::{ResourceSyncer, SyncReport};
use crate::upstream::UpstreamResponse;

/// Invoked by the sync client for every received change set.
#[async_trait]
pub trait Callbacks: Send + Sync {
    async fn on_resources_received(&self, upstream: UpstreamResponse) -> SyncResult<SyncReport>;
}

/// Stores resources a zone receives from global.
pub struct ZoneSyncCallback {
    syncer: Arc<dyn ResourceSyncer>,
    registry: Arc<TypeRegistry>,
    synced_configs: Arc<BTreeSet<String>>,
}

impl ZoneSyncCallback {
    pub fn new(
        syncer: Arc<dyn ResourceSyncer>,
        registry: Arc<TypeRegistry>,
        synced_configs: Arc<BTreeSet<String>>,
    ) -> Self {
        Self {
            syncer,
            registry,
            synced_configs,
        }
    }
}

#[async_trait]
impl Callbacks for ZoneSyncCallback {
    async fn on_resources_received(&self, upstream: UpstreamResponse) -> SyncResult<SyncReport> {
        let descriptor = self.registry.descriptor(&upstream.resource_type)?;
        let opts = SyncOptions::new().skip_conflicts(descriptor.skip_hash_suffix);

        let opts = match upstream.resource_type.as_str() {
            types::CONFIG => {
                let synced = self.synced_configs.clone();
                opts.prefilter_by(move |r| synced.contains(r.name()))
            }
            types::GLOBAL_SECRET => opts.prefilter_by(|r| {
                r.name().starts_with(ZONE_TOKEN_SIGNING_PUBLIC_KEY_PREFIX)
            }),
            _ => {
                // Resources authored on this zone are never replaced by
                // global, unless the type cannot be authored on a zone.
                let provided_by_zone = descriptor.flags.provided_by_zone();
                opts.prefilter_by(move |r| {
                    !is_locally_originated(ControlPlaneMode::Zone, r.labels()) || !provided_by_zone
                })
            }
        };
        self.syncer.sync(upstream, opts).await
    }
}

/// Stores resources global receives from one zone.
pub struct GlobalSyncCallback {
    syncer: Arc<dyn ResourceSyncer>,
    registry: Arc<TypeRegistry>,
    zone: String,
    zone_features: Features,
}

impl GlobalSyncCallback {
    /// `zone` and `zone_features` are what the zone declared when opening the
    /// connection. Responses are attributed to `zone` whatever control plane
    /// id they carry.
    pub fn new(
        syncer: Arc<dyn ResourceSyncer>,
        registry: Arc<TypeRegistry>,
        zone: impl Into<String>,
        zone_features: Features,
    ) -> Self {
        Self {
            syncer,
            registry,
            zone: zone.into(),
            zone_features,
        }
    }
}

#[async_trait]
impl Callbacks for GlobalSyncCallback {
    async fn on_resources_received(&self, mut upstream: UpstreamResponse) -> SyncResult<SyncReport> {
        let descriptor = self.registry.descriptor(&upstream.resource_type)?;
        let zone = self.zone.clone();
        if upstream.control_plane_id != zone {
            tracing::debug!(
                zone = %zone,
                control_plane_id = %upstream.control_plane_id,
                "response control plane id differs from the handshake zone"
            );
        }

        // Zones without hash-suffixed names are kept apart by a zone prefix.
        if !self.zone_features.has(HASH_SUFFIX) {
            upstream.removed = upstream
                .removed
                .iter()
                .map(|k| k.with_name_prefix(&zone))
                .collect();
            for r in upstream.added.items_mut() {
                r.meta.name = format!("{zone}.{}", r.meta.name);
            }
        }

        let is_gateway = upstream.resource_type == types::ZONE_INGRESS
            || upstream.resource_type == types::ZONE_EGRESS;
        for r in upstream.added.items_mut() {
            r.meta.labels.insert(ZONE_LABEL.to_string(), zone.clone());
            r.meta
                .labels
                .insert(ORIGIN_LABEL.to_string(), Origin::Zone.as_str().to_string());
            if is_gateway {
                if !r.spec.is_object() {
                    r.spec = Value::Object(Map::new());
                }
                if let Some(spec) = r.spec.as_object_mut() {
                    spec.insert("zone".to_string(), Value::String(zone.clone()));
                }
            }
        }

        let prefix = format!("{zone}.");
        let owner_zone = zone.clone();
        let opts = SyncOptions::new()
            .skip_conflicts(descriptor.skip_hash_suffix)
            .owned_by(OwnerRef::new(types::ZONE, ResourceKey::global(owner_zone)))
            .prefilter_by(move |r| {
                r.name().starts_with(&prefix) || r.label(ZONE_LABEL) == Some(zone.as_str())
            });
        self.syncer.sync(upstream, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_store::{
        CreateOptions, InMemoryResourceStore, ListOptions, ResourceStore,
    };
    use meshsync_types::{Resource, ResourceList, ResourceType};
    use serde_json::json;

    use crate::context::CLUSTER_ID_CONFIG;
    use crate::syncer::StoreSyncer;

    fn syncer(store: &InMemoryResourceStore) -> Arc<dyn ResourceSyncer> {
        Arc::new(StoreSyncer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(TypeRegistry::builtin()),
        ))
    }

    fn zone_callback(store: &InMemoryResourceStore) -> ZoneSyncCallback {
        ZoneSyncCallback::new(
            syncer(store),
            Arc::new(TypeRegistry::builtin()),
            Arc::new([CLUSTER_ID_CONFIG.to_string()].into_iter().collect()),
        )
    }

    fn global_callback(
        store: &InMemoryResourceStore,
        zone: &str,
        features: Features,
    ) -> GlobalSyncCallback {
        GlobalSyncCallback::new(syncer(store), Arc::new(TypeRegistry::builtin()), zone, features)
    }

    async fn create_zone(store: &InMemoryResourceStore, name: &str) {
        store
            .create(
                Resource::new(types::ZONE, &ResourceKey::global(name), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();
    }

    async fn names(store: &InMemoryResourceStore, resource_type: &str) -> Vec<String> {
        store
            .list(&ResourceType::from(resource_type), ListOptions::default())
            .await
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    fn dataplane(name: &str) -> Resource {
        Resource::new(
            types::DATAPLANE,
            &ResourceKey::new("default", name),
            json!({"networking": {"address": "10.0.0.1"}}),
        )
    }

    #[tokio::test]
    async fn zone_keeps_its_own_resources() {
        let store = InMemoryResourceStore::new();
        // Authored on the zone: no origin label.
        store
            .create(
                Resource::new(types::MESH_SERVICE, &ResourceKey::new("default", "local"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let upstream = UpstreamResponse::initial(
            "global",
            ResourceList::from_items(
                types::MESH_SERVICE,
                [Resource::new(types::MESH_SERVICE, &ResourceKey::new("default", "remote"), json!({}))
                    .with_labels([(ORIGIN_LABEL, "global")])],
            )
            .unwrap(),
        );
        zone_callback(&store).on_resources_received(upstream).await.unwrap();

        assert_eq!(names(&store, types::MESH_SERVICE).await, vec!["local", "remote"]);
    }

    #[tokio::test]
    async fn zone_replaces_global_types_authored_before_federation() {
        let store = InMemoryResourceStore::new();
        store
            .create(
                Resource::new(types::MESH, &ResourceKey::global("legacy"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let upstream = UpstreamResponse::initial(
            "global",
            ResourceList::from_items(
                types::MESH,
                [Resource::new(types::MESH, &ResourceKey::global("default"), json!({}))],
            )
            .unwrap(),
        );
        zone_callback(&store).on_resources_received(upstream).await.unwrap();

        assert_eq!(names(&store, types::MESH).await, vec!["default"]);
    }

    #[tokio::test]
    async fn zone_keeps_private_configs() {
        let store = InMemoryResourceStore::new();
        store
            .create(
                Resource::new(types::CONFIG, &ResourceKey::global("insights"), json!({})),
                CreateOptions::default(),
            )
            .await
            .unwrap();

        let upstream = UpstreamResponse::initial(
            "global",
            ResourceList::from_items(
                types::CONFIG,
                [Resource::new(types::CONFIG, &ResourceKey::global(CLUSTER_ID_CONFIG), json!({"id": "c1"}))],
            )
            .unwrap(),
        );
        zone_callback(&store).on_resources_received(upstream).await.unwrap();

        assert_eq!(names(&store, types::CONFIG).await, vec!["insights", CLUSTER_ID_CONFIG]);
    }

    #[tokio::test]
    async fn global_stamps_zone_identity_and_owner() {
        let store = InMemoryResourceStore::new();
        create_zone(&store, "east").await;

        let upstream = UpstreamResponse::initial(
            "east",
            ResourceList::from_items(types::DATAPLANE, [dataplane("web-1234")]).unwrap(),
        );
        let features: Features = [HASH_SUFFIX].into_iter().collect();
        global_callback(&store, "east", features)
            .on_resources_received(upstream)
            .await
            .unwrap();

        let stored = store
            .get(&types::DATAPLANE.into(), &ResourceKey::new("default", "web-1234"))
            .await
            .unwrap();
        assert_eq!(stored.label(ZONE_LABEL), Some("east"));
        assert_eq!(stored.label(ORIGIN_LABEL), Some("zone"));

        let owned = store
            .list(
                &types::DATAPLANE.into(),
                ListOptions::default().owned_by(OwnerRef::new(types::ZONE, ResourceKey::global("east"))),
            )
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
    }

    #[tokio::test]
    async fn global_prefixes_names_for_legacy_zones() {
        let store = InMemoryResourceStore::new();
        create_zone(&store, "east").await;

        let upstream = UpstreamResponse::initial(
            "east",
            ResourceList::from_items(types::DATAPLANE, [dataplane("web")]).unwrap(),
        );
        global_callback(&store, "east", Features::new())
            .on_resources_received(upstream)
            .await
            .unwrap();
        assert_eq!(names(&store, types::DATAPLANE).await, vec!["east.web"]);

        let removal = UpstreamResponse::delta(
            "east",
            ResourceList::new(types::DATAPLANE),
            vec![ResourceKey::new("default", "web")],
        );
        global_callback(&store, "east", Features::new())
            .on_resources_received(removal)
            .await
            .unwrap();
        assert!(names(&store, types::DATAPLANE).await.is_empty());
    }

    #[tokio::test]
    async fn global_only_touches_the_sending_zone() {
        let store = InMemoryResourceStore::new();
        create_zone(&store, "east").await;
        create_zone(&store, "west").await;

        let features: Features = [HASH_SUFFIX].into_iter().collect();
        for zone in ["east", "west"] {
            let upstream = UpstreamResponse::initial(
                zone,
                ResourceList::from_items(types::DATAPLANE, [dataplane(&format!("web-{zone}"))]).unwrap(),
            );
            global_callback(&store, zone, features.clone())
                .on_resources_received(upstream)
                .await
                .unwrap();
        }
        // An empty snapshot from east leaves west untouched.
        let empty = UpstreamResponse::initial("east", ResourceList::new(types::DATAPLANE));
        global_callback(&store, "east", features)
            .on_resources_received(empty)
            .await
            .unwrap();

        assert_eq!(names(&store, types::DATAPLANE).await, vec!["web-west"]);
    }

    #[tokio::test]
    async fn global_forces_gateway_zone() {
        let store = InMemoryResourceStore::new();
        create_zone(&store, "east").await;

        let ingress = Resource::new(types::ZONE_INGRESS, &ResourceKey::global("ingress"), json!({"zone": "spoofed"}));
        let upstream = UpstreamResponse::initial(
            "east",
            ResourceList::from_items(types::ZONE_INGRESS, [ingress]).unwrap(),
        );
        let features: Features = [HASH_SUFFIX].into_iter().collect();
        global_callback(&store, "east", features)
            .on_resources_received(upstream)
            .await
            .unwrap();

        let stored = store
            .get(&types::ZONE_INGRESS.into(), &ResourceKey::global("ingress"))
            .await
            .unwrap();
        assert_eq!(stored.spec["zone"], json!("east"));
    }

    #[tokio::test]
    async fn global_attributes_resources_to_the_handshake_zone() {
        let store = InMemoryResourceStore::new();
        create_zone(&store, "east").await;

        // The response claims to come from west; the stream belongs to east.
        let upstream = UpstreamResponse::initial(
            "west",
            ResourceList::from_items(types::DATAPLANE, [dataplane("web-1234")]).unwrap(),
        );
        let features: Features = [HASH_SUFFIX].into_iter().collect();
        global_callback(&store, "east", features)
            .on_resources_received(upstream)
            .await
            .unwrap();

        let stored = store
            .get(&types::DATAPLANE.into(), &ResourceKey::new("default", "web-1234"))
            .await
            .unwrap();
        assert_eq!(stored.label(ZONE_LABEL), Some("east"));
    }
}
