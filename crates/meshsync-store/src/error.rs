use meshsync_types::{ResourceKey, ResourceType, TypeError};

/// Errors from resource store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type} {key}")]
    NotFound {
        resource_type: ResourceType,
        key: ResourceKey,
    },

    /// A resource with the same type and key already exists.
    #[error("resource already exists: {resource_type} {key}")]
    AlreadyExists {
        resource_type: ResourceType,
        key: ResourceKey,
    },

    /// Optimistic concurrency check failed.
    #[error("version conflict on {resource_type} {key}: expected {expected}, found {actual}")]
    Conflict {
        resource_type: ResourceType,
        key: ResourceKey,
        expected: String,
        actual: String,
    },

    /// The owner referenced in create options does not exist.
    #[error("owner not found: {resource_type} {key}")]
    OwnerNotFound {
        resource_type: ResourceType,
        key: ResourceKey,
    },

    /// The resource cannot be stored as given.
    #[error("invalid resource: {0}")]
    Invalid(String),

    /// The backend cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A transaction could not be committed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl StoreError {
    pub fn not_found(resource_type: &ResourceType, key: &ResourceKey) -> Self {
        Self::NotFound {
            resource_type: resource_type.clone(),
            key: key.clone(),
        }
    }

    pub fn already_exists(resource_type: &ResourceType, key: &ResourceKey) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.clone(),
            key: key.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
