use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use meshsync_sync::{BackoffConfig, ContextConfig};
use meshsync_types::ControlPlaneMode;

use crate::error::{ServerError, ServerResult};

/// Port global listens on for zone connections.
pub const DEFAULT_KDS_PORT: u16 = 5685;

/// Control plane configuration. Durations are in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub mode: ControlPlaneMode,
    /// Name of this zone. Required in zone mode.
    pub zone: Option<String>,
    /// Address global accepts zone connections on.
    pub listen_addr: SocketAddr,
    /// Address a zone dials to reach global.
    pub global_address: String,
    /// Pause after each applied non-initial response, before the ACK.
    pub response_backoff_ms: u64,
    /// Period of the full snapshot refresh on provider sessions.
    pub refresh_interval_ms: u64,
    pub context: ContextConfig,
    pub backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ControlPlaneMode::Global,
            zone: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_KDS_PORT)),
            global_address: format!("127.0.0.1:{DEFAULT_KDS_PORT}"),
            response_backoff_ms: 0,
            refresh_interval_ms: 30_000,
            context: ContextConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.mode == ControlPlaneMode::Zone {
            self.zone_name()?;
        }
        if self.refresh_interval_ms == 0 {
            return Err(ServerError::Config("refresh_interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ServerError::Config("backoff.jitter must be within [0, 1]".into()));
        }
        Ok(())
    }

    pub fn zone_name(&self) -> ServerResult<&str> {
        match self.zone.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ServerError::Config("zone mode requires a zone name".into())),
        }
    }

    pub fn response_backoff(&self) -> Duration {
        Duration::from_millis(self.response_backoff_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}
