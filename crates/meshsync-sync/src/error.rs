use std::fmt;

use thiserror::Error;

use meshsync_protocol::ProtocolError;
use meshsync_store::StoreError;
use meshsync_types::{ResourceKey, ResourceType, TypeError};

/// Errors that abort a replication connection.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("transport error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("cannot map {resource_type} {key}: {reason}")]
    Mapping {
        resource_type: ResourceType,
        key: ResourceKey,
        reason: String,
    },

    #[error("peer reported error {code}: {message}")]
    Remote { code: u32, message: String },

    #[error("protocol violation: {0}")]
    Violation(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// One resource that could not be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectionCause {
    pub resource_type: ResourceType,
    pub key: ResourceKey,
    pub reason: String,
}

impl fmt::Display for RejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.resource_type, self.key, self.reason)
    }
}

/// Resources rejected during one reconciliation.
///
/// A rejection never prevents the valid remainder of a batch from being
/// applied. It is reported to the peer in a NACK.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rejection {
    pub causes: Vec<RejectionCause>,
}

impl Rejection {
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn push(&mut self, cause: RejectionCause) {
        self.causes.push(cause);
    }

    /// Whether a cause names `key`.
    pub fn names(&self, key: &ResourceKey) -> bool {
        self.causes.iter().any(|c| &c.key == key)
    }

    /// `Some` if at least one resource was rejected.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} resource(s) rejected", self.causes.len())?;
        for cause in &self.causes {
            write!(f, "; {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Rejection {}
