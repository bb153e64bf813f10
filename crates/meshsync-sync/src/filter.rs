//! Ownership filters deciding which resources a control plane offers to a
//! peer.
//!
//! A resource replicated into a store is never offered back in the direction
//! it came from: global only offers resources it authored plus resources of
//! cross-zone types authored by *other* zones, and a zone only offers what it
//! authored itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use meshsync_protocol::Features;
use meshsync_store::{ListOptions, ResourceStore, StoreResult};
use meshsync_types::labels::ZONE_LABEL;
use meshsync_types::{
    is_locally_originated, is_sync_disabled, types, ControlPlaneMode, Resource, SyncFlags,
    TypeRegistry,
};

use crate::context::ZONE_TOKEN_SIGNING_KEY_PREFIX;

/// Enabled state of the known zones, read once per snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZoneStates(BTreeMap<String, bool>);

impl ZoneStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every zone resource from the store. A zone without an explicit
    /// `enabled` field is enabled.
    pub async fn load(store: &dyn ResourceStore) -> StoreResult<Self> {
        let zones = store
            .list(&types::ZONE.into(), ListOptions::default())
            .await?;
        Ok(zones
            .iter()
            .map(|z| {
                let enabled = z.spec.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                (z.name().to_string(), enabled)
            })
            .collect())
    }

    pub fn set(&mut self, zone: impl Into<String>, enabled: bool) {
        self.0.insert(zone.into(), enabled);
    }

    /// Unknown zones count as enabled: without an explicit `enabled: false`
    /// connectivity is not cut.
    pub fn is_enabled(&self, zone: &str) -> bool {
        self.0.get(zone).copied().unwrap_or(true)
    }
}

impl FromIterator<(String, bool)> for ZoneStates {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The peer a snapshot is computed for.
#[derive(Clone, Debug, Default)]
pub struct FilterContext {
    /// Zone at the other end of the connection, or the local zone when a
    /// zone provides to global.
    pub zone: String,
    pub features: Features,
    pub zones: ZoneStates,
}

impl FilterContext {
    pub fn new(zone: impl Into<String>, features: Features, zones: ZoneStates) -> Self {
        Self {
            zone: zone.into(),
            features,
            zones,
        }
    }
}

/// Decides whether a resource is offered to a peer.
pub trait ResourceFilter: Send + Sync {
    fn accepts(&self, ctx: &FilterContext, resource: &Resource) -> bool;
}

/// Zone a zone-authored resource came from: its zone label, or `spec.zone`
/// for gateways that predate the label.
pub fn zone_of(resource: &Resource) -> Option<&str> {
    resource
        .label(ZONE_LABEL)
        .or_else(|| resource.spec.get("zone").and_then(Value::as_str))
}

/// Filter applied by global when providing to a zone.
pub struct GlobalProvidedFilter {
    registry: Arc<TypeRegistry>,
    synced_configs: Arc<BTreeSet<String>>,
}

impl GlobalProvidedFilter {
    pub fn new(registry: Arc<TypeRegistry>, synced_configs: Arc<BTreeSet<String>>) -> Self {
        Self {
            registry,
            synced_configs,
        }
    }
}

impl ResourceFilter for GlobalProvidedFilter {
    fn accepts(&self, ctx: &FilterContext, resource: &Resource) -> bool {
        if is_sync_disabled(resource.labels()) {
            return false;
        }
        // Config and secrets hold entries private to each control plane.
        match resource.resource_type.as_str() {
            types::CONFIG => return self.synced_configs.contains(resource.name()),
            types::GLOBAL_SECRET if !resource.name().starts_with(ZONE_TOKEN_SIGNING_KEY_PREFIX) => {
                return false;
            }
            _ => {}
        }

        let Ok(descriptor) = self.registry.descriptor(&resource.resource_type) else {
            return false;
        };
        let is_global = is_locally_originated(ControlPlaneMode::Global, resource.labels());

        if is_global {
            return descriptor.flags.has(SyncFlags::GLOBAL_TO_ZONES);
        }
        if !descriptor.flags.has(SyncFlags::SYNCED_ACROSS_ZONES) {
            return false;
        }
        match zone_of(resource) {
            // Never send a resource back to the zone it came from.
            Some(origin) if origin == ctx.zone => false,
            Some(origin) => ctx.zones.is_enabled(origin),
            None => true,
        }
    }
}

/// Filter applied by a zone when providing to global.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZoneProvidedFilter;

impl ResourceFilter for ZoneProvidedFilter {
    fn accepts(&self, _ctx: &FilterContext, resource: &Resource) -> bool {
        !is_sync_disabled(resource.labels())
            && is_locally_originated(ControlPlaneMode::Zone, resource.labels())
    }
}
