use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::key::{ResourceKey, ResourceType};

/// Labels attached to a resource. Ordered so equality and hashing are stable.
pub type Labels = BTreeMap<String, String>;

/// Store-managed metadata of a resource.
///
/// `version`, `creation_time` and `modification_time` are owned by the store
/// that holds the resource; they never cross the replication boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub name: String,
    pub mesh: String,
    pub labels: Labels,
    pub version: String,
    pub creation_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
}

impl ResourceMeta {
    pub fn for_key(key: &ResourceKey) -> Self {
        Self {
            name: key.name.clone(),
            mesh: key.mesh.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.mesh.clone(), self.name.clone())
    }
}

/// A typed, versioned record. `spec` and `status` are opaque to replication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub meta: ResourceMeta,
    pub spec: Value,
    pub status: Option<Value>,
}

impl Resource {
    /// Create a resource with the given key and spec and empty store metadata.
    pub fn new(resource_type: impl Into<ResourceType>, key: &ResourceKey, spec: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            meta: ResourceMeta::for_key(key),
            spec,
            status: None,
        }
    }

    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.meta.labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_status(mut self, status: Value) -> Self {
        self.status = Some(status);
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.meta.key()
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn mesh(&self) -> &str {
        &self.meta.mesh
    }

    pub fn labels(&self) -> &Labels {
        &self.meta.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.meta.labels.get(key).map(String::as_str)
    }

    /// Whether spec, labels and status are structurally equal.
    ///
    /// Store metadata (version, timestamps) is ignored.
    pub fn same_content(&self, other: &Resource) -> bool {
        self.spec == other.spec
            && self.meta.labels == other.meta.labels
            && self.status == other.status
    }
}

/// An ordered collection of resources of a single type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceList {
    resource_type: ResourceType,
    items: Vec<Resource>,
}

impl ResourceList {
    pub fn new(resource_type: impl Into<ResourceType>) -> Self {
        Self {
            resource_type: resource_type.into(),
            items: Vec::new(),
        }
    }

    /// Build a list, rejecting items of a different type.
    pub fn from_items(
        resource_type: impl Into<ResourceType>,
        items: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, TypeError> {
        let mut list = Self::new(resource_type);
        for item in items {
            list.push(item)?;
        }
        Ok(list)
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn push(&mut self, resource: Resource) -> Result<(), TypeError> {
        if resource.resource_type != self.resource_type {
            return Err(TypeError::TypeMismatch {
                expected: self.resource_type.clone(),
                actual: resource.resource_type,
            });
        }
        self.items.push(resource);
        Ok(())
    }

    pub fn items(&self) -> &[Resource] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Resource] {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<Resource> {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.items.iter().map(Resource::key).collect()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.items
            .iter()
            .find(|r| r.meta.mesh == key.mesh && r.meta.name == key.name)
    }

    /// Keep only the items matching `predicate`.
    pub fn retain(&mut self, mut predicate: impl FnMut(&Resource) -> bool) {
        self.items.retain(|r| predicate(r));
    }
}

impl IntoIterator for ResourceList {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mesh(name: &str) -> Resource {
        Resource::new("Mesh", &ResourceKey::global(name), json!({"mtls": false}))
    }

    #[test]
    fn same_content_ignores_store_meta() {
        let a = mesh("default");
        let mut b = mesh("default");
        b.meta.version = "7".into();
        b.meta.modification_time = Utc::now();
        assert!(a.same_content(&b));
    }

    #[test]
    fn same_content_detects_label_change() {
        let a = mesh("default");
        let b = mesh("default").with_labels([("team", "core")]);
        assert!(!a.same_content(&b));
    }

    #[test]
    fn same_content_detects_status_change() {
        let a = mesh("default");
        let b = mesh("default").with_status(json!({"ready": true}));
        assert!(!a.same_content(&b));
    }

    #[test]
    fn list_rejects_foreign_type() {
        let mut list = ResourceList::new("Mesh");
        let dp = Resource::new("Dataplane", &ResourceKey::new("default", "web"), json!({}));
        let err = list.push(dp).unwrap_err();
        assert!(matches!(err, TypeError::TypeMismatch { .. }));
        assert!(list.is_empty());
    }

    #[test]
    fn list_lookup_and_retain() {
        let mut list = ResourceList::from_items("Mesh", [mesh("a"), mesh("b"), mesh("c")]).unwrap();
        assert!(list.get(&ResourceKey::global("b")).is_some());
        list.retain(|r| r.name() != "b");
        assert_eq!(list.len(), 2);
        assert!(list.get(&ResourceKey::global("b")).is_none());
        assert_eq!(
            list.keys(),
            vec![ResourceKey::global("a"), ResourceKey::global("c")]
        );
    }
}
