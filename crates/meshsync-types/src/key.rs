use std::fmt;

use serde::{Deserialize, Serialize};

/// Mesh value used by resources that are not scoped to a mesh.
pub const NO_MESH: &str = "";

/// Name of a registered resource type (e.g. `"Mesh"`, `"Dataplane"`).
///
/// Types are resolved against the [`TypeRegistry`](crate::TypeRegistry) once
/// at startup; afterwards they travel through the system as plain names.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ResourceType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for ResourceType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ResourceType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceType({})", self.0)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a resource within one type: `(mesh, name)`.
///
/// `mesh` is [`NO_MESH`] for global-scoped types.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub mesh: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(mesh: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            name: name.into(),
        }
    }

    /// Key of a global-scoped resource.
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(NO_MESH, name)
    }

    pub fn is_global(&self) -> bool {
        self.mesh.is_empty()
    }

    /// Copy of this key with `prefix.` prepended to the name.
    pub fn with_name_prefix(&self, prefix: &str) -> Self {
        Self::new(self.mesh.clone(), format!("{prefix}.{}", self.name))
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mesh.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.mesh, self.name)
        }
    }
}
