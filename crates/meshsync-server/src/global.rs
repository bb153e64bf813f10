//! Global control plane: accepts zone connections.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use meshsync_protocol::{
    channel_pair, features, tcp_connection, BuildInfo, Connection, Features, NodeInfo, StreamKind,
    StreamOpen,
};
use meshsync_store::{CreateOptions, StoreError, UpdateOptions};
use meshsync_sync::{
    DeltaDiscoveryStream, GlobalSyncCallback, KdsContext, ProviderSession, StatusTracker,
    SyncClient, Watcher,
};
use meshsync_types::labels::ORIGIN_LABEL;
use meshsync_types::{types, Origin, Resource, ResourceKey, ResourceType, TypeRegistry};

use crate::backend::Backend;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handshake;

/// Control plane id global puts in its responses.
pub const GLOBAL_CONTROL_PLANE_ID: &str = "global";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const IN_PROCESS_BUFFER: usize = 64;
/// Attempts at writing a zone insight before giving up on a conflict.
const INSIGHT_ATTEMPTS: usize = 3;

pub struct GlobalControlPlane {
    config: ServerConfig,
    backend: Backend,
    ctx: KdsContext,
    status: Arc<StatusTracker>,
    watcher: Watcher,
    /// Recorded in zone insights so a reconnect to another instance is visible.
    instance_id: String,
    cancel: CancellationToken,
}

impl GlobalControlPlane {
    /// Start watching the store. Connections are served until `cancel` fires.
    pub fn start(config: ServerConfig, backend: Backend, cancel: CancellationToken) -> Arc<Self> {
        let registry = Arc::new(TypeRegistry::builtin());
        let ctx = KdsContext::new(registry, None, &config.context);
        let watcher = Watcher::start(
            backend.changes.clone(),
            ctx.types_sent_by_global.clone(),
            cancel.clone(),
        );
        let instance_id = Uuid::now_v7().to_string();
        tracing::info!(
            instance = %instance_id,
            provided = ctx.types_sent_by_global.len(),
            consumed = ctx.types_sent_by_zone.len(),
            "global control plane started"
        );
        Arc::new(Self {
            config,
            backend,
            ctx,
            status: Arc::new(StatusTracker::new()),
            watcher,
            instance_id,
            cancel,
        })
    }

    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    pub fn context(&self) -> &KdsContext {
        &self.ctx
    }

    /// Accept zone connections on `listener` until cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> ServerResult<()> {
        tracing::info!(addr = %listener.local_addr()?, "accepting zone connections");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "zone connected");
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(error = %e, "cannot disable Nagle");
                        }
                        self.accept(tcp_connection(stream));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }
    }

    /// Serve one zone connection in the background.
    pub fn accept(self: &Arc<Self>, conn: Connection) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.handle(conn).await {
                tracing::warn!(error = %e, "zone connection ended with error");
            }
        })
    }

    /// A connection to this control plane without a network hop.
    pub fn connect_in_process(self: &Arc<Self>) -> Connection {
        let (local, remote) = channel_pair(IN_PROCESS_BUFFER);
        self.accept(remote);
        local
    }

    async fn handle(&self, mut conn: Connection) -> ServerResult<()> {
        let open = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake::accept_stream(&mut conn))
            .await
            .map_err(|_| ServerError::Handshake("timed out waiting for StreamOpen".into()))??;
        let span = tracing::info_span!("zone_stream", zone = %open.zone, kind = %open.kind);
        self.serve_stream(open, conn).instrument(span).await
    }

    async fn serve_stream(&self, open: StreamOpen, conn: Connection) -> ServerResult<()> {
        tracing::info!(
            version = %open.build.version,
            features = ?open.features,
            "zone stream opened"
        );
        if self.ctx.create_zone_on_first_connect {
            self.ensure_zone(&open.zone).await?;
        }
        let (zone, kind) = (open.zone.clone(), open.kind);
        self.record_stream(&zone, kind, true).await;
        let result = self.run_stream(open, conn).await;
        self.record_stream(&zone, kind, false).await;
        result
    }

    async fn run_stream(&self, open: StreamOpen, conn: Connection) -> ServerResult<()> {
        let features: Features = open.features.iter().cloned().collect();
        let cancel = self.cancel.child_token();

        match open.kind {
            StreamKind::GlobalToZone => {
                ProviderSession::new(
                    self.backend.store.clone(),
                    self.ctx.global_provided_filter.clone(),
                    self.ctx.global_mapper.clone(),
                    self.ctx.types_sent_by_global.clone(),
                    GLOBAL_CONTROL_PLANE_ID,
                )
                .for_peer(open.zone.clone(), features)
                .with_changes(self.watcher.subscribe())
                .with_refresh_interval(self.config.refresh_interval())
                .with_status(self.status.clone(), StreamKind::GlobalToZone)
                .run(conn, cancel)
                .await?;
            }
            StreamKind::ZoneToGlobal => {
                let registry = self.ctx.registry.clone();
                let callbacks = Arc::new(GlobalSyncCallback::new(
                    self.backend.syncer(registry.clone()),
                    registry.clone(),
                    open.zone.clone(),
                    features,
                ));
                let node = NodeInfo {
                    id: GLOBAL_CONTROL_PLANE_ID.to_string(),
                    build: BuildInfo::current(),
                    features: features::supported(),
                };
                let mut stream = DeltaDiscoveryStream::new(conn, registry, node);
                SyncClient::new(self.ctx.types_sent_by_zone.clone(), callbacks)
                    .with_response_backoff(self.config.response_backoff())
                    .run(&mut stream, cancel)
                    .await?;
            }
        }
        Ok(())
    }

    async fn ensure_zone(&self, zone: &str) -> ServerResult<()> {
        let zone_type = ResourceType::from(types::ZONE);
        let key = ResourceKey::global(zone);
        match self.backend.store.get(&zone_type, &key).await {
            Ok(_) => return Ok(()),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let resource = Resource::new(zone_type, &key, json!({ "enabled": true }))
            .with_labels([(ORIGIN_LABEL, Origin::Global.as_str())]);
        match self.backend.store.create(resource, CreateOptions::default()).await {
            Ok(_) => {
                tracing::info!(zone, "created zone on first connect");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stamp the zone insight with the open or close of one stream. Failures
    /// are logged; the stream itself is not affected.
    async fn record_stream(&self, zone: &str, kind: StreamKind, connected: bool) {
        for attempt in 1..=INSIGHT_ATTEMPTS {
            match self.upsert_insight(zone, kind, connected).await {
                Ok(()) => return,
                Err(e) if (e.is_conflict() || e.is_already_exists()) && attempt < INSIGHT_ATTEMPTS => {
                    tracing::debug!(error = %e, attempt, "zone insight changed concurrently, retrying");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot record zone insight");
                    return;
                }
            }
        }
    }

    async fn upsert_insight(
        &self,
        zone: &str,
        kind: StreamKind,
        connected: bool,
    ) -> Result<(), StoreError> {
        let insight_type = ResourceType::from(types::ZONE_INSIGHT);
        let key = ResourceKey::global(zone);
        let existing = match self.backend.store.get(&insight_type, &key).await {
            Ok(r) => Some(r),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let mut resource = existing
            .clone()
            .unwrap_or_else(|| Resource::new(insight_type, &key, json!({})));
        if !resource.spec.is_object() {
            resource.spec = json!({});
        }
        let now = Utc::now().to_rfc3339();
        let entry = &mut resource.spec[kind.to_string()];
        if connected {
            *entry = json!({
                "connected_at": now,
                "global_instance_id": self.instance_id,
            });
        } else {
            match entry.as_object_mut() {
                Some(fields) => {
                    fields.insert("disconnected_at".into(), json!(now));
                }
                None => *entry = json!({ "disconnected_at": now }),
            }
        }

        match existing {
            Some(_) => self.backend.store.update(resource, UpdateOptions::default()).await?,
            None => self.backend.store.create(resource, CreateOptions::default()).await?,
        };
        Ok(())
    }
}

impl std::fmt::Debug for GlobalControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalControlPlane")
            .field("listen_addr", &self.config.listen_addr)
            .finish_non_exhaustive()
    }
}
