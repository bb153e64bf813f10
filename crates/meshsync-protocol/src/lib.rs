//! Wire protocol for meshsync.
//!
//! Defines the framing, message types, and transports used between a zone and
//! the global control plane. Each connection carries one direction of
//! replication; the zone opens it with a [`StreamOpen`] frame and the two
//! sides then exchange delta discovery requests and responses per resource
//! type.

pub mod codec;
pub mod error;
pub mod features;
pub mod message;
pub mod resource;
pub mod transport;

pub use codec::KdsCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use features::Features;
pub use message::{
    BuildInfo, DeltaDiscoveryRequest, DeltaDiscoveryResponse, ErrorDetail, KdsMessage, NodeInfo,
    StreamKind, StreamOpen, WireResource, MAX_MESSAGE_SIZE, PROTOCOL_VERSION, WILDCARD,
};
pub use resource::{from_wire, to_wire};
pub use transport::{
    channel_pair, tcp_connection, ChannelSink, ChannelSource, Connection, MessageSink,
    MessageSource, TcpSink, TcpSource,
};
