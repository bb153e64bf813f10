use std::collections::BTreeSet;

use meshsync_types::{ResourceKey, ResourceList, ResourceType};

/// One change set received for a resource type.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    /// Identity of the control plane that sent the change set. For a zone
    /// talking to global this is the zone name.
    pub control_plane_id: String,
    pub resource_type: ResourceType,
    /// Resources that were added or changed.
    pub added: ResourceList,
    pub removed: Vec<ResourceKey>,
    pub nonce: String,
    /// First response for the type on this connection. The added set is then
    /// the complete upstream state.
    pub is_initial: bool,
}

impl UpstreamResponse {
    /// A complete snapshot.
    pub fn initial(control_plane_id: impl Into<String>, added: ResourceList) -> Self {
        Self {
            control_plane_id: control_plane_id.into(),
            resource_type: added.resource_type().clone(),
            added,
            removed: Vec::new(),
            nonce: String::new(),
            is_initial: true,
        }
    }

    /// An incremental delta.
    pub fn delta(
        control_plane_id: impl Into<String>,
        added: ResourceList,
        removed: Vec<ResourceKey>,
    ) -> Self {
        Self {
            control_plane_id: control_plane_id.into(),
            resource_type: added.resource_type().clone(),
            added,
            removed,
            nonce: String::new(),
            is_initial: false,
        }
    }

    pub fn added_keys(&self) -> BTreeSet<ResourceKey> {
        self.added.keys().into_iter().collect()
    }

    pub fn removed_keys(&self) -> BTreeSet<ResourceKey> {
        self.removed.iter().cloned().collect()
    }

    /// Keys touched by this change set: added ∪ removed.
    pub fn touched_keys(&self) -> BTreeSet<ResourceKey> {
        let mut keys = self.added_keys();
        keys.extend(self.removed.iter().cloned());
        keys
    }
}
