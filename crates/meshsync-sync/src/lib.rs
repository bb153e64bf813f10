//! Resource replication between a global control plane and its zones.
//!
//! Both sides of a connection run the same building blocks. The provider
//! side serves filtered, mapped snapshots of its store through a
//! [`ProviderSession`]. The consumer side receives them on a
//! [`DeltaDiscoveryStream`], hands them to [`Callbacks`], and reconciles the
//! local store with a [`ResourceSyncer`].
//!
//! # Key Types
//!
//! - [`StoreSyncer`] -- applies an upstream change set to a store
//! - [`KdsContext`] -- filters and mappers of both replication directions
//! - [`ProviderSession`] -- flow-controlled serving of snapshots
//! - [`SyncClient`] -- subscribe, receive, apply and ACK loop
//! - [`StatusTracker`] -- per-stream delivery statistics
//!
//! # Invariants
//!
//! 1. A reconciliation only touches resources inside its prefilter scope.
//! 2. Applying the same snapshot twice changes nothing the second time.
//! 3. A provider never has more than one unacknowledged response per type.

pub mod callbacks;
pub mod client;
pub mod context;
pub mod error;
pub mod filter;
pub mod mapper;
pub mod metrics;
pub mod options;
pub mod session;
pub mod status;
pub mod stream;
pub mod supervisor;
pub mod syncer;
pub mod upstream;
pub mod watch;

pub use callbacks::{Callbacks, GlobalSyncCallback, ZoneSyncCallback};
pub use client::SyncClient;
pub use context::{ContextConfig, KdsContext};
pub use error::{Rejection, RejectionCause, SyncError, SyncResult};
pub use filter::{FilterContext, GlobalProvidedFilter, ResourceFilter, ZoneProvidedFilter, ZoneStates};
pub use mapper::{CompositeMapper, HashSuffix, ResourceMapper};
pub use options::SyncOptions;
pub use session::ProviderSession;
pub use status::{StatusTracker, StreamStatus, TypeStats};
pub use stream::{DeltaDiscoveryStream, NACK_ERROR_CODE};
pub use supervisor::{supervise, Backoff, BackoffConfig};
pub use syncer::{ResourceSyncer, StoreSyncer, SyncReport};
pub use upstream::UpstreamResponse;
pub use watch::Watcher;
