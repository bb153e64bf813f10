//! Resource storage for meshsync.
//!
//! The replication engine only talks to storage through the traits in this
//! crate. Backends classify their errors so the engine can tell a tolerated
//! create conflict from a failure that must abort the connection.
//!
//! # Traits
//!
//! - [`ResourceStore`] -- CRUD and list over typed resources
//! - [`Transactions`] / [`Transaction`] -- atomic batches of writes
//! - [`ChangeFeed`] -- broadcast of committed mutations
//!
//! # Storage Backends
//!
//! - [`InMemoryResourceStore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Store metadata (version, timestamps) is owned by the store.
//! 2. Every accepted update changes the version.
//! 3. Deleting an owner deletes what it owns.
//! 4. Change events are emitted only for committed writes.

pub mod error;
pub mod events;
pub mod memory;
pub mod options;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use events::{Operation, ResourceChangedEvent};
pub use memory::{InMemoryResourceStore, MemoryTransaction};
pub use options::{CreateOptions, DeleteOptions, ListOptions, OwnerRef, UpdateOptions};
pub use traits::{ChangeFeed, NoTransactions, ResourceStore, Transaction, Transactions};
