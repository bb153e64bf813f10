//! Foundation types for meshsync.
//!
//! This crate defines the resource model replicated between a global control
//! plane and its zones. Every other meshsync crate depends on `meshsync-types`.
//!
//! # Key Types
//!
//! - [`ResourceKey`] -- `(mesh, name)` identity of a resource within its type
//! - [`Resource`] -- Typed envelope with store metadata, opaque spec and status
//! - [`ResourceList`] -- Ordered resources of a single type
//! - [`TypeDescriptor`] -- Scope, replication flags and validation of a type
//! - [`TypeRegistry`] -- Type catalogue resolved once at startup

pub mod descriptor;
pub mod error;
pub mod key;
pub mod labels;
pub mod registry;
pub mod resource;

pub use descriptor::{Scope, SyncFlags, TypeDescriptor, Validator};
pub use error::TypeError;
pub use key::{ResourceKey, ResourceType, NO_MESH};
pub use labels::{is_locally_originated, is_sync_disabled, ControlPlaneMode, Origin};
pub use registry::{types, TypeFilter, TypeRegistry};
pub use resource::{Labels, Resource, ResourceList, ResourceMeta};
