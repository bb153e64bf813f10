//! Bookkeeping of open replication streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use meshsync_protocol::StreamKind;
use meshsync_types::ResourceType;

/// Counters of one resource type on a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeStats {
    pub responses_sent: u64,
    pub acks_received: u64,
    pub nacks_received: u64,
}

/// State of one stream, as reported by [`StatusTracker::get`].
#[derive(Clone, Debug)]
pub struct StreamStatus {
    pub id: Uuid,
    pub zone: String,
    pub kind: StreamKind,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub stats: BTreeMap<ResourceType, TypeStats>,
    pub last_nack_error: Option<String>,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        self.disconnected_at.is_none()
    }
}

/// Tracks every stream served by a control plane.
///
/// Closed streams are kept until the zone opens a new stream of the same
/// kind, so the last disconnect stays observable.
#[derive(Debug, Default)]
pub struct StatusTracker {
    streams: RwLock<HashMap<Uuid, StreamStatus>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream and return its id.
    pub fn open(&self, zone: &str, kind: StreamKind) -> Uuid {
        let id = Uuid::now_v7();
        let mut streams = self.streams.write().expect("status lock poisoned");
        streams.retain(|_, s| s.is_connected() || s.zone != zone || s.kind != kind);
        streams.insert(
            id,
            StreamStatus {
                id,
                zone: zone.to_string(),
                kind,
                connected_at: Utc::now(),
                disconnected_at: None,
                stats: BTreeMap::new(),
                last_nack_error: None,
            },
        );
        tracing::debug!(stream = %id, zone, kind = %kind, "stream opened");
        id
    }

    pub fn close(&self, id: Uuid) {
        self.update(id, |s| s.disconnected_at = Some(Utc::now()));
        tracing::debug!(stream = %id, "stream closed");
    }

    pub fn record_response(&self, id: Uuid, resource_type: &ResourceType) {
        self.update(id, |s| s.stats.entry(resource_type.clone()).or_default().responses_sent += 1);
    }

    pub fn record_ack(&self, id: Uuid, resource_type: &ResourceType) {
        self.update(id, |s| s.stats.entry(resource_type.clone()).or_default().acks_received += 1);
    }

    pub fn record_nack(&self, id: Uuid, resource_type: &ResourceType, error: &str) {
        self.update(id, |s| {
            s.stats.entry(resource_type.clone()).or_default().nacks_received += 1;
            s.last_nack_error = Some(error.to_string());
        });
    }

    pub fn get(&self, id: Uuid) -> Option<StreamStatus> {
        self.streams
            .read()
            .expect("status lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Streams of `zone`, oldest first.
    pub fn streams_of(&self, zone: &str) -> Vec<StreamStatus> {
        let mut streams: Vec<_> = self
            .streams
            .read()
            .expect("status lock poisoned")
            .values()
            .filter(|s| s.zone == zone)
            .cloned()
            .collect();
        streams.sort_by_key(|s| s.connected_at);
        streams
    }

    /// Number of connected streams.
    pub fn connected(&self) -> usize {
        self.streams
            .read()
            .expect("status lock poisoned")
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut StreamStatus)) {
        let mut streams = self.streams.write().expect("status lock poisoned");
        if let Some(status) = streams.get_mut(&id) {
            f(status);
        }
    }
}
