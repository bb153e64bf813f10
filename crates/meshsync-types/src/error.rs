use thiserror::Error;

use crate::key::{ResourceKey, ResourceType};

/// Errors produced by type operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown resource type: {0}")]
    UnknownType(ResourceType),

    #[error("resource type already registered: {0}")]
    DuplicateType(ResourceType),

    #[error("type mismatch: list holds {expected}, got {actual}")]
    TypeMismatch {
        expected: ResourceType,
        actual: ResourceType,
    },

    #[error("invalid resource {resource_type} {key}: {reason}")]
    Validation {
        resource_type: ResourceType,
        key: ResourceKey,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}
