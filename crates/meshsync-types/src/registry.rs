//! Registry of resource types.
//!
//! Types are resolved once when the control plane starts. Replication code
//! asks the registry for descriptors and for the exact set of types exchanged
//! in each direction.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::descriptor::{Scope, SyncFlags, TypeDescriptor};
use crate::error::TypeError;
use crate::key::{ResourceKey, ResourceType};
use crate::resource::{Resource, ResourceList};

/// Names of the built-in resource types.
pub mod types {
    pub const MESH: &str = "Mesh";
    pub const DATAPLANE: &str = "Dataplane";
    pub const DATAPLANE_INSIGHT: &str = "DataplaneInsight";
    pub const ZONE_INGRESS: &str = "ZoneIngress";
    pub const ZONE_INGRESS_INSIGHT: &str = "ZoneIngressInsight";
    pub const ZONE_EGRESS: &str = "ZoneEgress";
    pub const ZONE_EGRESS_INSIGHT: &str = "ZoneEgressInsight";
    pub const TRAFFIC_PERMISSION: &str = "TrafficPermission";
    pub const TRAFFIC_ROUTE: &str = "TrafficRoute";
    pub const MESH_SERVICE: &str = "MeshService";
    pub const CONFIG: &str = "Config";
    pub const GLOBAL_SECRET: &str = "GlobalSecret";
    pub const SECRET: &str = "Secret";
    pub const ZONE: &str = "Zone";
    pub const ZONE_INSIGHT: &str = "ZoneInsight";
}

/// Predicate used to select types from the registry.
pub type TypeFilter = fn(&TypeDescriptor) -> bool;

/// Types a zone sends to global.
pub fn sent_from_zone_to_global(d: &TypeDescriptor) -> bool {
    d.flags.provided_by_zone()
}

/// Types global sends to zones.
pub fn sent_from_global_to_zone(d: &TypeDescriptor) -> bool {
    d.flags.provided_by_global()
}

pub fn has_any_flag(d: &TypeDescriptor) -> bool {
    !d.flags.is_empty()
}

#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    descriptors: BTreeMap<ResourceType, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), TypeError> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(TypeError::DuplicateType(descriptor.name));
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn descriptor(&self, resource_type: &ResourceType) -> Result<&TypeDescriptor, TypeError> {
        self.descriptors
            .get(resource_type)
            .ok_or_else(|| TypeError::UnknownType(resource_type.clone()))
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.descriptors.contains_key(resource_type)
    }

    /// An empty resource of the given type with an empty object as its spec.
    pub fn new_object(&self, resource_type: &ResourceType) -> Result<Resource, TypeError> {
        let desc = self.descriptor(resource_type)?;
        Ok(Resource::new(
            desc.name.clone(),
            &ResourceKey::default(),
            Value::Object(Default::default()),
        ))
    }

    pub fn new_list(&self, resource_type: &ResourceType) -> Result<ResourceList, TypeError> {
        let desc = self.descriptor(resource_type)?;
        Ok(ResourceList::new(desc.name.clone()))
    }

    /// Names of all types accepted by `filter`, in name order.
    pub fn object_types(&self, filter: TypeFilter) -> Vec<ResourceType> {
        self.descriptors
            .values()
            .filter(|d| filter(d))
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The built-in catalogue of types known to every control plane.
    pub fn builtin() -> Self {
        let g2z = SyncFlags::GLOBAL_TO_ZONES;
        let z2g = SyncFlags::ZONE_TO_GLOBAL;
        let across = SyncFlags::SYNCED_ACROSS_ZONES;

        let catalogue = [
            TypeDescriptor::new(types::MESH, Scope::Global)
                .with_flags(g2z)
                .skip_hash_suffix(),
            TypeDescriptor::new(types::DATAPLANE, Scope::Mesh)
                .with_flags(z2g)
                .with_validator(validate_dataplane),
            TypeDescriptor::new(types::DATAPLANE_INSIGHT, Scope::Mesh).with_flags(z2g),
            TypeDescriptor::new(types::ZONE_INGRESS, Scope::Global)
                .with_flags(across)
                .with_validator(validate_zone_gateway),
            TypeDescriptor::new(types::ZONE_INGRESS_INSIGHT, Scope::Global).with_flags(z2g),
            TypeDescriptor::new(types::ZONE_EGRESS, Scope::Global)
                .with_flags(across)
                .with_validator(validate_zone_gateway),
            TypeDescriptor::new(types::ZONE_EGRESS_INSIGHT, Scope::Global).with_flags(z2g),
            TypeDescriptor::new(types::TRAFFIC_PERMISSION, Scope::Mesh).with_flags(g2z),
            TypeDescriptor::new(types::TRAFFIC_ROUTE, Scope::Mesh)
                .with_flags(g2z)
                .with_validator(validate_traffic_route),
            TypeDescriptor::new(types::MESH_SERVICE, Scope::Mesh)
                .with_flags(across)
                .with_status(),
            TypeDescriptor::new(types::CONFIG, Scope::Global)
                .with_flags(g2z)
                .skip_hash_suffix(),
            TypeDescriptor::new(types::GLOBAL_SECRET, Scope::Global)
                .with_flags(g2z)
                .skip_hash_suffix(),
            TypeDescriptor::new(types::SECRET, Scope::Mesh)
                .with_flags(g2z)
                .skip_hash_suffix(),
            TypeDescriptor::new(types::ZONE, Scope::Global),
            TypeDescriptor::new(types::ZONE_INSIGHT, Scope::Global),
        ];

        let mut registry = Self::new();
        for desc in catalogue {
            registry
                .descriptors
                .insert(desc.name.clone(), desc);
        }
        registry
    }
}

fn validate_dataplane(r: &Resource) -> Result<(), String> {
    let address = r
        .spec
        .pointer("/networking/address")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if address.is_empty() {
        return Err("networking.address must be set".into());
    }
    Ok(())
}

fn validate_zone_gateway(r: &Resource) -> Result<(), String> {
    match r.spec.get("zone") {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err("zone must be a string".into()),
    }
}

fn validate_traffic_route(r: &Resource) -> Result<(), String> {
    match r.spec.get("destinations").and_then(Value::as_array) {
        Some(d) if !d.is_empty() => Ok(()),
        _ => Err("at least one destination is required".into()),
    }
}
