use std::fmt;

use serde::{Deserialize, Serialize};

use meshsync_types::{Labels, ResourceKey, ResourceType};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Subscription that selects every resource of a type.
pub const WILDCARD: &str = "*";

/// All message types in the replication protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KdsMessage {
    /// First frame sent by a zone on every connection.
    StreamOpen(StreamOpen),
    Request(DeltaDiscoveryRequest),
    Response(DeltaDiscoveryResponse),
    /// Fatal error reported by the peer before closing the connection.
    Error { code: u32, message: String },
}

impl KdsMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::StreamOpen(_) => 1,
            Self::Request(_) => 2,
            Self::Response(_) => 3,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StreamOpen(_) => "StreamOpen",
            Self::Request(_) => "Request",
            Self::Response(_) => "Response",
            Self::Error { .. } => "Error",
        }
    }
}

/// Direction of the resources flowing on a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Global provides, zone consumes.
    GlobalToZone,
    /// Zone provides, global consumes.
    ZoneToGlobal,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalToZone => f.write_str("global-to-zone"),
            Self::ZoneToGlobal => f.write_str("zone-to-global"),
        }
    }
}

/// Build metadata of a control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_commit: String,
}

impl BuildInfo {
    /// Build info of this binary.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: option_env!("MESHSYNC_GIT_COMMIT")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOpen {
    pub version: u32,
    pub zone: String,
    pub kind: StreamKind,
    pub features: Vec<String>,
    pub build: BuildInfo,
}

/// Identity of the requesting control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub build: BuildInfo,
    pub features: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: u32,
    pub message: String,
}

/// Subscribe, ACK or NACK for one resource type.
///
/// A request with `error_detail` rejects a response and carries the last
/// acknowledged nonce, which is empty if nothing was acknowledged yet.
/// Otherwise a request without `response_nonce` subscribes and one with a
/// nonce acknowledges that response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaDiscoveryRequest {
    pub node: NodeInfo,
    pub type_url: ResourceType,
    pub resource_names_subscribe: Vec<String>,
    pub response_nonce: String,
    pub error_detail: Option<ErrorDetail>,
}

impl DeltaDiscoveryRequest {
    pub fn is_subscribe(&self) -> bool {
        self.response_nonce.is_empty() && self.error_detail.is_none()
    }

    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// One resource as carried on the wire.
///
/// `payload` holds the JSON-encoded spec and status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResource {
    pub key: ResourceKey,
    pub version: String,
    pub labels: Labels,
    pub payload: Vec<u8>,
}

/// Added and removed resources of one type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaDiscoveryResponse {
    pub type_url: ResourceType,
    pub resources: Vec<WireResource>,
    pub removed_resources: Vec<ResourceKey>,
    pub nonce: String,
    pub control_plane_id: String,
}
