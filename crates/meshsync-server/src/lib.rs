//! Control-plane wiring for meshsync.
//!
//! A global control plane accepts zone connections and serves every zone
//! the resources it is meant to receive. A zone control plane dials global
//! twice: one connection receives global's resources, the other publishes
//! the zone's own.

pub mod backend;
pub mod config;
pub mod error;
pub mod global;
pub mod handshake;
pub mod zone;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use meshsync_types::ControlPlaneMode;

pub use backend::Backend;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use global::GlobalControlPlane;
pub use zone::{Dialer, InProcessDialer, TcpDialer, ZoneControlPlane};

/// Install a formatting subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Run the control plane described by `config` until `cancel` fires.
pub async fn run(config: ServerConfig, backend: Backend, cancel: CancellationToken) -> anyhow::Result<()> {
    config.validate()?;
    meshsync_sync::metrics::describe();

    match config.mode {
        ControlPlaneMode::Global => {
            let listener = TcpListener::bind(config.listen_addr)
                .await
                .with_context(|| format!("binding {}", config.listen_addr))?;
            GlobalControlPlane::start(config, backend, cancel).serve(listener).await?;
        }
        ControlPlaneMode::Zone => {
            let dialer = Arc::new(TcpDialer::new(config.global_address.clone()));
            ZoneControlPlane::new(config, backend)?.run(dialer, cancel).await;
        }
    }
    Ok(())
}
