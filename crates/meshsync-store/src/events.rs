use serde::{Deserialize, Serialize};

use meshsync_types::{ResourceKey, ResourceType};

/// Kind of mutation that produced a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Notification emitted after a mutation becomes visible in the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChangedEvent {
    pub operation: Operation,
    pub resource_type: ResourceType,
    pub key: ResourceKey,
    /// Version after the mutation. Empty for deletes.
    pub version: String,
}

impl ResourceChangedEvent {
    pub fn new(
        operation: Operation,
        resource_type: ResourceType,
        key: ResourceKey,
        version: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            resource_type,
            key,
            version: version.into(),
        }
    }
}
