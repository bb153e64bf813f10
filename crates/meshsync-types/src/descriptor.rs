use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::ResourceType;
use crate::resource::Resource;

/// Whether resources of a type live inside a mesh or at the top level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Mesh,
}

/// Replication flags of a resource type.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncFlags(u32);

impl SyncFlags {
    pub const NONE: SyncFlags = SyncFlags(0);
    /// Authored on global and pushed to every zone.
    pub const GLOBAL_TO_ZONES: SyncFlags = SyncFlags(1 << 0);
    /// Authored on a zone and pushed to global.
    pub const ZONE_TO_GLOBAL: SyncFlags = SyncFlags(1 << 1);
    /// Authored on a zone, collected by global and fanned out to the other zones.
    pub const SYNCED_ACROSS_ZONES: SyncFlags = SyncFlags(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if any bit of `other` is set.
    pub const fn has(self, other: SyncFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: SyncFlags) -> SyncFlags {
        SyncFlags(self.0 | other.0)
    }

    pub fn consumed_by_zone(self) -> bool {
        self.has(Self::GLOBAL_TO_ZONES.union(Self::SYNCED_ACROSS_ZONES))
    }

    pub fn consumed_by_global(self) -> bool {
        self.has(Self::ZONE_TO_GLOBAL.union(Self::SYNCED_ACROSS_ZONES))
    }

    pub fn provided_by_zone(self) -> bool {
        self.consumed_by_global()
    }

    pub fn provided_by_global(self) -> bool {
        self.consumed_by_zone()
    }
}

impl BitOr for SyncFlags {
    type Output = SyncFlags;

    fn bitor(self, rhs: SyncFlags) -> SyncFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for SyncFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.has(Self::GLOBAL_TO_ZONES) {
            names.push("GLOBAL_TO_ZONES");
        }
        if self.has(Self::ZONE_TO_GLOBAL) {
            names.push("ZONE_TO_GLOBAL");
        }
        if self.has(Self::SYNCED_ACROSS_ZONES) {
            names.push("SYNCED_ACROSS_ZONES");
        }
        if names.is_empty() {
            f.write_str("SyncFlags(NONE)")
        } else {
            write!(f, "SyncFlags({})", names.join(" | "))
        }
    }
}

/// Per-type validation hook. Returns a human-readable reason on failure.
pub type Validator = fn(&Resource) -> Result<(), String>;

/// Static metadata of a resource type.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub name: ResourceType,
    pub scope: Scope,
    pub flags: SyncFlags,
    /// Keep the original name when replicating instead of adding a hash suffix.
    pub skip_hash_suffix: bool,
    pub has_status: bool,
    pub validator: Option<Validator>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<ResourceType>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            flags: SyncFlags::NONE,
            skip_hash_suffix: false,
            has_status: false,
            validator: None,
        }
    }

    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn skip_hash_suffix(mut self) -> Self {
        self.skip_hash_suffix = true;
        self
    }

    pub fn with_status(mut self) -> Self {
        self.has_status = true;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn is_mesh_scoped(&self) -> bool {
        self.scope == Scope::Mesh
    }

    /// Validate a resource against this descriptor.
    ///
    /// Structural checks (type, name, mesh scope) run before the per-type hook.
    pub fn validate(&self, resource: &Resource) -> Result<(), TypeError> {
        let fail = |reason: String| TypeError::Validation {
            resource_type: self.name.clone(),
            key: resource.key(),
            reason,
        };

        if resource.resource_type != self.name {
            return Err(TypeError::TypeMismatch {
                expected: self.name.clone(),
                actual: resource.resource_type.clone(),
            });
        }
        if resource.name().is_empty() {
            return Err(fail("name must not be empty".into()));
        }
        match self.scope {
            Scope::Mesh if resource.mesh().is_empty() => {
                return Err(fail("mesh must be set for a mesh-scoped type".into()));
            }
            Scope::Global if !resource.mesh().is_empty() => {
                return Err(fail("mesh must be empty for a global-scoped type".into()));
            }
            _ => {}
        }
        if resource.status.is_some() && !self.has_status {
            return Err(fail("type does not carry a status".into()));
        }
        if let Some(validator) = self.validator {
            validator(resource).map_err(fail)?;
        }
        Ok(())
    }
}
