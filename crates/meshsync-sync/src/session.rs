//! Provider side of a replication connection.
//!
//! A session answers subscriptions with snapshots of the local store, after
//! filtering and mapping them for the peer. Only the difference to what was
//! last sent goes on the wire, and a type never has more than one response
//! waiting for an ACK: changes arriving meanwhile are folded into the next
//! response.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use meshsync_protocol::{
    to_wire, Connection, DeltaDiscoveryRequest, DeltaDiscoveryResponse, Features, KdsMessage,
    MessageSink, StreamKind, WireResource,
};
use meshsync_store::{ListOptions, ResourceStore};
use meshsync_types::{ResourceKey, ResourceType};

use crate::error::{SyncError, SyncResult};
use crate::filter::{FilterContext, ResourceFilter, ZoneStates};
use crate::mapper::ResourceMapper;
use crate::metrics;
use crate::status::StatusTracker;

/// Default period of the full snapshot refresh.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Subscription {
    /// Content last offered to the peer, by key.
    sent: BTreeMap<ResourceKey, WireResource>,
    outstanding: Option<String>,
    dirty: bool,
    initial_sent: bool,
    acked: bool,
}

enum Change {
    Type(ResourceType),
    All,
    Closed,
}

async fn next_change(changes: &mut Option<broadcast::Receiver<ResourceType>>) -> Change {
    match changes {
        Some(rx) => match rx.recv().await {
            Ok(resource_type) => Change::Type(resource_type),
            Err(broadcast::error::RecvError::Lagged(_)) => Change::All,
            Err(broadcast::error::RecvError::Closed) => Change::Closed,
        },
        None => std::future::pending().await,
    }
}

/// Serves one connection as the resource provider.
pub struct ProviderSession {
    store: Arc<dyn ResourceStore>,
    filter: Arc<dyn ResourceFilter>,
    mapper: Arc<dyn ResourceMapper>,
    provided: BTreeSet<ResourceType>,
    control_plane_id: String,
    peer_zone: String,
    peer_features: Features,
    refresh_interval: Duration,
    changes: Option<broadcast::Receiver<ResourceType>>,
    status: Option<(Arc<StatusTracker>, StreamKind)>,
    last_nonce: u64,
}

impl ProviderSession {
    /// `control_plane_id` identifies this control plane in every response.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        filter: Arc<dyn ResourceFilter>,
        mapper: Arc<dyn ResourceMapper>,
        provided: impl IntoIterator<Item = ResourceType>,
        control_plane_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            filter,
            mapper,
            provided: provided.into_iter().collect(),
            control_plane_id: control_plane_id.into(),
            peer_zone: String::new(),
            peer_features: Features::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            changes: None,
            status: None,
            last_nonce: 0,
        }
    }

    /// The zone snapshots are computed for and the features it advertised.
    pub fn for_peer(mut self, zone: impl Into<String>, features: Features) -> Self {
        self.peer_zone = zone.into();
        self.peer_features = features;
        self
    }

    /// Recompute a type's snapshot when it is notified on `changes`.
    pub fn with_changes(mut self, changes: broadcast::Receiver<ResourceType>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_status(mut self, tracker: Arc<StatusTracker>, kind: StreamKind) -> Self {
        self.status = Some((tracker, kind));
        self
    }

    /// Serve `conn` until the peer closes it, an error occurs or `cancel`
    /// fires.
    pub async fn run(mut self, conn: Connection, cancel: CancellationToken) -> SyncResult<()> {
        let stream_id = self
            .status
            .as_ref()
            .map(|(tracker, kind)| tracker.open(&self.peer_zone, *kind));
        let result = self.serve(conn, cancel, stream_id).await;
        if let (Some((tracker, _)), Some(id)) = (&self.status, stream_id) {
            tracker.close(id);
        }
        result
    }

    async fn serve(
        &mut self,
        conn: Connection,
        cancel: CancellationToken,
        stream_id: Option<Uuid>,
    ) -> SyncResult<()> {
        let (mut sink, mut source) = conn.split();
        let mut changes = self.changes.take();
        let mut subs: BTreeMap<ResourceType, Subscription> = BTreeMap::new();

        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = source.recv() => match msg? {
                    None => {
                        tracing::info!(zone = %self.peer_zone, "stream closed by peer");
                        return Ok(());
                    }
                    Some(KdsMessage::Request(req)) => self.handle_request(req, &mut subs, stream_id),
                    Some(KdsMessage::Error { code, message }) => {
                        return Err(SyncError::Remote { code, message });
                    }
                    Some(other) => {
                        return Err(SyncError::Violation(format!(
                            "unexpected {} message from a consumer",
                            other.type_name()
                        )));
                    }
                },
                change = next_change(&mut changes) => match change {
                    Change::Type(resource_type) => {
                        if let Some(sub) = subs.get_mut(&resource_type) {
                            sub.dirty = true;
                        }
                    }
                    Change::All => subs.values_mut().for_each(|s| s.dirty = true),
                    Change::Closed => changes = None,
                },
                _ = refresh.tick() => subs.values_mut().for_each(|s| s.dirty = true),
            }
            self.flush(&mut subs, sink.as_mut(), stream_id).await?;
        }
    }

    fn handle_request(
        &self,
        req: DeltaDiscoveryRequest,
        subs: &mut BTreeMap<ResourceType, Subscription>,
        stream_id: Option<Uuid>,
    ) {
        let resource_type = req.type_url;
        if req.error_detail.is_none() && req.response_nonce.is_empty() {
            if !self.provided.contains(&resource_type) {
                tracing::warn!(
                    resource_type = %resource_type,
                    zone = %self.peer_zone,
                    "ignoring subscription to a type that is not provided"
                );
                return;
            }
            tracing::debug!(resource_type = %resource_type, zone = %self.peer_zone, "subscribed");
            subs.insert(
                resource_type,
                Subscription {
                    dirty: true,
                    ..Default::default()
                },
            );
            return;
        }

        let Some(sub) = subs.get_mut(&resource_type) else {
            tracing::warn!(resource_type = %resource_type, "request for a type without subscription");
            return;
        };
        let Some(outstanding) = sub.outstanding.clone() else {
            tracing::debug!(resource_type = %resource_type, nonce = %req.response_nonce, "ignoring stale request");
            return;
        };

        if let Some(error) = req.error_detail {
            sub.outstanding = None;
            // The peer still holds nothing it accepted: the next response
            // must be a full snapshot again.
            if !sub.acked {
                sub.sent.clear();
                sub.initial_sent = false;
            }
            tracing::warn!(
                resource_type = %resource_type,
                zone = %self.peer_zone,
                nonce = %outstanding,
                error = %error.message,
                "response rejected by peer"
            );
            metrics::record_nack(&resource_type);
            if let (Some((tracker, _)), Some(id)) = (&self.status, stream_id) {
                tracker.record_nack(id, &resource_type, &error.message);
            }
        } else if req.response_nonce == outstanding {
            sub.outstanding = None;
            sub.acked = true;
            tracing::debug!(resource_type = %resource_type, nonce = %outstanding, "response acknowledged");
            metrics::record_ack(&resource_type);
            if let (Some((tracker, _)), Some(id)) = (&self.status, stream_id) {
                tracker.record_ack(id, &resource_type);
            }
        } else {
            tracing::debug!(resource_type = %resource_type, nonce = %req.response_nonce, "ignoring stale ACK");
        }
    }

    async fn snapshot(
        &self,
        resource_type: &ResourceType,
        ctx: &FilterContext,
    ) -> SyncResult<BTreeMap<ResourceKey, WireResource>> {
        let resources = self.store.list(resource_type, ListOptions::default()).await?;
        let mut snapshot = BTreeMap::new();
        for resource in resources {
            if !self.filter.accepts(ctx, &resource) {
                continue;
            }
            let mapped = self.mapper.map(&ctx.features, resource)?;
            let wire = to_wire(&mapped)?;
            snapshot.insert(wire.key.clone(), wire);
        }
        Ok(snapshot)
    }

    async fn flush(
        &mut self,
        subs: &mut BTreeMap<ResourceType, Subscription>,
        sink: &mut dyn MessageSink,
        stream_id: Option<Uuid>,
    ) -> SyncResult<()> {
        let pending: Vec<ResourceType> = subs
            .iter()
            .filter(|(_, s)| s.dirty && s.outstanding.is_none())
            .map(|(t, _)| t.clone())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let zones = ZoneStates::load(self.store.as_ref()).await?;
        let ctx = FilterContext::new(self.peer_zone.clone(), self.peer_features.clone(), zones);

        for resource_type in pending {
            let snapshot = self.snapshot(&resource_type, &ctx).await?;
            let Some(sub) = subs.get_mut(&resource_type) else {
                continue;
            };
            sub.dirty = false;

            let resources: Vec<WireResource> = snapshot
                .iter()
                .filter(|(key, wire)| sub.sent.get(*key) != Some(*wire))
                .map(|(_, wire)| wire.clone())
                .collect();
            let removed: Vec<ResourceKey> = sub
                .sent
                .keys()
                .filter(|key| !snapshot.contains_key(*key))
                .cloned()
                .collect();
            if sub.initial_sent && resources.is_empty() && removed.is_empty() {
                continue;
            }

            self.last_nonce += 1;
            let nonce = self.last_nonce.to_string();
            tracing::debug!(
                resource_type = %resource_type,
                zone = %self.peer_zone,
                nonce = %nonce,
                added = resources.len(),
                removed = removed.len(),
                "sending response"
            );
            sink.send(KdsMessage::Response(DeltaDiscoveryResponse {
                type_url: resource_type.clone(),
                resources,
                removed_resources: removed,
                nonce: nonce.clone(),
                control_plane_id: self.control_plane_id.clone(),
            }))
            .await?;

            sub.sent = snapshot;
            sub.outstanding = Some(nonce);
            sub.initial_sent = true;
            metrics::record_response_sent(&resource_type);
            if let (Some((tracker, _)), Some(id)) = (&self.status, stream_id) {
                tracker.record_response(id, &resource_type);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("control_plane_id", &self.control_plane_id)
            .field("peer_zone", &self.peer_zone)
            .field("provided", &self.provided)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}
