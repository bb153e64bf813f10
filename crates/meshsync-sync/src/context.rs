//! Per-control-plane replication context: which types flow in which
//! direction and how they are filtered and rewritten on the way out.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use meshsync_types::labels::{
    DELETION_GRACE_PERIOD_STARTED_LABEL, KUBE_NAMESPACE_LABEL, ORIGIN_LABEL, ZONE_LABEL,
};
use meshsync_types::registry::{sent_from_global_to_zone, sent_from_zone_to_global};
use meshsync_types::{types, Origin, ResourceType, TypeRegistry};

use crate::filter::{GlobalProvidedFilter, ResourceFilter, ZoneProvidedFilter};
use crate::mapper::{
    CompositeMapper, HashSuffix, MapIf, RemoveStatus, ResourceMapper, SigningKeyToPublicKey,
    WithLabel, WithoutLabel, WithoutLabelPrefixes, ZeroSubscriptionGeneration,
};

/// Name prefix of the global secrets holding zone token signing keys.
pub const ZONE_TOKEN_SIGNING_KEY_PREFIX: &str = "zone-token-signing-key";
/// Name prefix of the public halves of those keys, as stored on zones.
pub const ZONE_TOKEN_SIGNING_PUBLIC_KEY_PREFIX: &str = "zone-token-signing-public-key";
/// Config entry identifying the cluster.
pub const CLUSTER_ID_CONFIG: &str = "meshsync-cluster-id";

/// Tunables of the replication context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Config entries replicated from global to zones.
    pub synced_configs: BTreeSet<String>,
    /// Label prefixes dropped from resources sent by global.
    pub global_skip_label_prefixes: Vec<String>,
    /// Label prefixes dropped from resources sent by a zone.
    pub zone_skip_label_prefixes: Vec<String>,
    /// Create the zone resource when a zone connects for the first time.
    pub create_zone_on_first_connect: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            synced_configs: [CLUSTER_ID_CONFIG.to_string()].into_iter().collect(),
            global_skip_label_prefixes: Vec::new(),
            zone_skip_label_prefixes: Vec::new(),
            create_zone_on_first_connect: true,
        }
    }
}

/// Everything a control plane needs to provide and consume resources.
#[derive(Clone)]
pub struct KdsContext {
    pub registry: Arc<TypeRegistry>,
    pub types_sent_by_zone: Vec<ResourceType>,
    pub types_sent_by_global: Vec<ResourceType>,
    pub global_provided_filter: Arc<dyn ResourceFilter>,
    pub zone_provided_filter: Arc<dyn ResourceFilter>,
    pub global_mapper: Arc<dyn ResourceMapper>,
    pub zone_mapper: Arc<dyn ResourceMapper>,
    pub synced_configs: Arc<BTreeSet<String>>,
    pub create_zone_on_first_connect: bool,
}

impl KdsContext {
    /// Build the context. `local_zone` is the zone name when running as a
    /// zone control plane and `None` on global.
    pub fn new(registry: Arc<TypeRegistry>, local_zone: Option<&str>, cfg: &ContextConfig) -> Self {
        let synced_configs = Arc::new(cfg.synced_configs.clone());
        Self {
            types_sent_by_zone: registry.object_types(sent_from_zone_to_global),
            types_sent_by_global: registry.object_types(sent_from_global_to_zone),
            global_provided_filter: Arc::new(GlobalProvidedFilter::new(
                registry.clone(),
                synced_configs.clone(),
            )),
            zone_provided_filter: Arc::new(ZoneProvidedFilter),
            global_mapper: Arc::new(global_mapper(registry.clone(), cfg)),
            zone_mapper: Arc::new(zone_mapper(local_zone, cfg)),
            synced_configs,
            create_zone_on_first_connect: cfg.create_zone_on_first_connect,
            registry,
        }
    }
}

impl std::fmt::Debug for KdsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdsContext")
            .field("types_sent_by_zone", &self.types_sent_by_zone)
            .field("types_sent_by_global", &self.types_sent_by_global)
            .field("synced_configs", &self.synced_configs)
            .field("create_zone_on_first_connect", &self.create_zone_on_first_connect)
            .finish_non_exhaustive()
    }
}

fn global_mapper(registry: Arc<TypeRegistry>, cfg: &ContextConfig) -> CompositeMapper {
    CompositeMapper::new()
        .then(WithLabel::new(ORIGIN_LABEL, Origin::Global.as_str()))
        .then(WithoutLabelPrefixes::new(cfg.global_skip_label_prefixes.clone()))
        .then(MapIf::new(
            |r| {
                r.resource_type == types::GLOBAL_SECRET
                    && r.name().starts_with(ZONE_TOKEN_SIGNING_KEY_PREFIX)
            },
            SigningKeyToPublicKey,
        ))
        .then(MapIf::new(|r| r.status.is_some(), RemoveStatus))
        .then(MapIf::new(
            move |r| {
                registry
                    .descriptor(&r.resource_type)
                    .map(|d| !d.skip_hash_suffix)
                    .unwrap_or(false)
            },
            HashSuffix::new(true, [ZONE_LABEL, KUBE_NAMESPACE_LABEL]),
        ))
}

fn zone_mapper(local_zone: Option<&str>, cfg: &ContextConfig) -> CompositeMapper {
    let mut mapper = CompositeMapper::new().then(WithLabel::new(ORIGIN_LABEL, Origin::Zone.as_str()));
    if let Some(zone) = local_zone {
        mapper = mapper.then(WithLabel::new(ZONE_LABEL, zone));
    }
    mapper
        .then(WithoutLabel::new(DELETION_GRACE_PERIOD_STARTED_LABEL))
        .then(WithoutLabelPrefixes::new(cfg.zone_skip_label_prefixes.clone()))
        .then(ZeroSubscriptionGeneration)
        .then(HashSuffix::new(false, [ZONE_LABEL, KUBE_NAMESPACE_LABEL]))
}
