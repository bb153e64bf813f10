use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meshsync_types::{Labels, Resource, ResourceKey, ResourceType};

/// Reference to a resource that owns another one.
///
/// Deleting the owner deletes everything it owns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    pub resource_type: ResourceType,
    pub key: ResourceKey,
}

impl OwnerRef {
    pub fn new(resource_type: impl Into<ResourceType>, key: ResourceKey) -> Self {
        Self {
            resource_type: resource_type.into(),
            key,
        }
    }

    pub fn of(resource: &Resource) -> Self {
        Self::new(resource.resource_type.clone(), resource.key())
    }
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub owner: Option<OwnerRef>,
    /// Replaces the labels carried by the resource.
    pub labels: Option<Labels>,
    pub creation_time: Option<DateTime<Utc>>,
}

impl CreateOptions {
    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn created_at(mut self, time: DateTime<Utc>) -> Self {
        self.creation_time = Some(time);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// Replaces the labels carried by the resource.
    pub labels: Option<Labels>,
    pub modification_time: Option<DateTime<Utc>>,
}

impl UpdateOptions {
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn modified_at(mut self, time: DateTime<Utc>) -> Self {
        self.modification_time = Some(time);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    /// Only delete if the stored version matches.
    pub version: Option<String>,
}

/// Selection criteria for [`list`](crate::ResourceStore::list).
///
/// All set criteria must match.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub mesh: Option<String>,
    /// Restrict the result to this subset of keys.
    pub keys: Option<BTreeSet<ResourceKey>>,
    /// Labels that must be present with the given values.
    pub labels: Labels,
    pub owner: Option<OwnerRef>,
}

impl ListOptions {
    pub fn in_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = ResourceKey>) -> Self {
        self.keys = Some(keys.into_iter().collect());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn owned_by(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Whether a resource owned by `owner` matches these options.
    pub fn matches(&self, resource: &Resource, owner: Option<&OwnerRef>) -> bool {
        if let Some(mesh) = &self.mesh {
            if resource.mesh() != mesh {
                return false;
            }
        }
        if let Some(keys) = &self.keys {
            if !keys.contains(&resource.key()) {
                return false;
            }
        }
        if let Some(wanted) = &self.owner {
            if owner != Some(wanted) {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| resource.label(k) == Some(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dp(mesh: &str, name: &str) -> Resource {
        Resource::new("Dataplane", &ResourceKey::new(mesh, name), json!({}))
            .with_labels([("zone", "east")])
    }

    #[test]
    fn empty_options_match_everything() {
        assert!(ListOptions::default().matches(&dp("default", "web"), None));
    }

    #[test]
    fn criteria_are_conjunctive() {
        let opts = ListOptions::default()
            .in_mesh("default")
            .with_label("zone", "east");
        assert!(opts.matches(&dp("default", "web"), None));
        assert!(!opts.matches(&dp("other", "web"), None));

        let opts = opts.with_label("zone", "west");
        assert!(!opts.matches(&dp("default", "web"), None));
    }

    #[test]
    fn key_subset_and_owner() {
        let owner = OwnerRef::new("Zone", ResourceKey::global("east"));
        let opts = ListOptions::default()
            .with_keys([ResourceKey::new("default", "web")])
            .owned_by(owner.clone());
        assert!(opts.matches(&dp("default", "web"), Some(&owner)));
        assert!(!opts.matches(&dp("default", "web"), None));
        assert!(!opts.matches(&dp("default", "api"), Some(&owner)));
    }
}
