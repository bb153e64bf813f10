//! Zone control plane: keeps one connection per direction open to global.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use meshsync_protocol::{features, tcp_connection, BuildInfo, Connection, Features, NodeInfo, StreamKind};
use meshsync_sync::{
    supervise, DeltaDiscoveryStream, KdsContext, ProviderSession, StatusTracker, SyncClient,
    Watcher, ZoneSyncCallback,
};
use meshsync_types::TypeRegistry;

use crate::backend::Backend;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::global::{GlobalControlPlane, GLOBAL_CONTROL_PLANE_ID};
use crate::handshake;

/// Opens connections to global.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> ServerResult<Connection>;
}

#[derive(Clone, Debug)]
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> ServerResult<Connection> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(tcp_connection(stream))
    }
}

/// Dials a global control plane running in the same process.
#[derive(Clone, Debug)]
pub struct InProcessDialer(pub Arc<GlobalControlPlane>);

#[async_trait]
impl Dialer for InProcessDialer {
    async fn dial(&self) -> ServerResult<Connection> {
        Ok(self.0.connect_in_process())
    }
}

pub struct ZoneControlPlane {
    zone: String,
    config: ServerConfig,
    backend: Backend,
    ctx: KdsContext,
    status: Arc<StatusTracker>,
}

impl ZoneControlPlane {
    pub fn new(config: ServerConfig, backend: Backend) -> ServerResult<Self> {
        let zone = config.zone_name()?.to_string();
        let ctx = KdsContext::new(Arc::new(TypeRegistry::builtin()), Some(&zone), &config.context);
        Ok(Self {
            zone,
            config,
            backend,
            ctx,
            status: Arc::new(StatusTracker::new()),
        })
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// Replicate in both directions until `cancel` fires. Each direction
    /// reconnects on its own after a failure.
    pub async fn run(&self, dialer: Arc<dyn Dialer>, cancel: CancellationToken) {
        tracing::info!(zone = %self.zone, "zone control plane started");
        let consume = supervise(
            "global-to-zone",
            self.config.backoff.clone(),
            cancel.clone(),
            || self.consume(dialer.as_ref(), cancel.child_token()),
        );
        let provide = supervise(
            "zone-to-global",
            self.config.backoff.clone(),
            cancel.clone(),
            || self.provide(dialer.as_ref(), cancel.child_token()),
        );
        tokio::join!(consume, provide);
    }

    /// Receive global's resources into the local store.
    async fn consume(&self, dialer: &dyn Dialer, cancel: CancellationToken) -> ServerResult<()> {
        let mut conn = dialer.dial().await?;
        handshake::open_stream(&mut conn, &self.zone, StreamKind::GlobalToZone).await?;

        let registry = self.ctx.registry.clone();
        let callbacks = Arc::new(ZoneSyncCallback::new(
            self.backend.syncer(registry.clone()),
            registry.clone(),
            self.ctx.synced_configs.clone(),
        ));
        let node = NodeInfo {
            id: self.zone.clone(),
            build: BuildInfo::current(),
            features: features::supported(),
        };
        let mut stream = DeltaDiscoveryStream::new(conn, registry, node);
        SyncClient::new(self.ctx.types_sent_by_global.clone(), callbacks)
            .with_response_backoff(self.config.response_backoff())
            .run(&mut stream, cancel)
            .await?;
        Ok(())
    }

    /// Serve the zone's own resources to global.
    async fn provide(&self, dialer: &dyn Dialer, cancel: CancellationToken) -> ServerResult<()> {
        let mut conn = dialer.dial().await?;
        handshake::open_stream(&mut conn, &self.zone, StreamKind::ZoneToGlobal).await?;

        let watcher = Watcher::start(
            self.backend.changes.clone(),
            self.ctx.types_sent_by_zone.clone(),
            cancel.clone(),
        );
        ProviderSession::new(
            self.backend.store.clone(),
            self.ctx.zone_provided_filter.clone(),
            self.ctx.zone_mapper.clone(),
            self.ctx.types_sent_by_zone.clone(),
            self.zone.clone(),
        )
        .for_peer(GLOBAL_CONTROL_PLANE_ID, Features::new())
        .with_changes(watcher.subscribe())
        .with_refresh_interval(self.config.refresh_interval())
        .with_status(self.status.clone(), StreamKind::ZoneToGlobal)
        .run(conn, cancel)
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ZoneControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneControlPlane")
            .field("zone", &self.zone)
            .field("global_address", &self.config.global_address)
            .finish_non_exhaustive()
    }
}
