//! Conversion between store resources and their wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use meshsync_types::{Resource, ResourceMeta, ResourceType};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::WireResource;

#[derive(Serialize, Deserialize)]
struct Payload {
    spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<Value>,
}

/// Encode a resource for a discovery response. Timestamps are not sent.
pub fn to_wire(resource: &Resource) -> ProtocolResult<WireResource> {
    let payload = serde_json::to_vec(&Payload {
        spec: resource.spec.clone(),
        status: resource.status.clone(),
    })
    .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    Ok(WireResource {
        key: resource.key(),
        version: resource.meta.version.clone(),
        labels: resource.meta.labels.clone(),
        payload,
    })
}

/// Decode a resource received in a discovery response for `resource_type`.
pub fn from_wire(resource_type: &ResourceType, wire: WireResource) -> ProtocolResult<Resource> {
    let payload: Payload = serde_json::from_slice(&wire.payload).map_err(|e| {
        ProtocolError::Deserialization(format!("{resource_type} {}: {e}", wire.key))
    })?;
    Ok(Resource {
        resource_type: resource_type.clone(),
        meta: ResourceMeta {
            name: wire.key.name,
            mesh: wire.key.mesh,
            labels: wire.labels,
            version: wire.version,
            ..Default::default()
        },
        spec: payload.spec,
        status: payload.status,
    })
}
