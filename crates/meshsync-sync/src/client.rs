//! Consumer side of a replication connection.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use meshsync_types::ResourceType;

use crate::callbacks::Callbacks;
use crate::error::SyncResult;
use crate::stream::DeltaDiscoveryStream;

/// Subscribes to a set of types and stores every received change set
/// through its callbacks.
pub struct SyncClient {
    types: Vec<ResourceType>,
    callbacks: Arc<dyn Callbacks>,
    response_backoff: Duration,
}

impl SyncClient {
    pub fn new(types: Vec<ResourceType>, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            types,
            callbacks,
            response_backoff: Duration::ZERO,
        }
    }

    /// Delay inserted before answering every response except the first of
    /// each type, smoothing the write rate on the local store.
    pub fn with_response_backoff(mut self, backoff: Duration) -> Self {
        self.response_backoff = backoff;
        self
    }

    /// Drive `stream` until it ends, fails or `cancel` fires.
    ///
    /// Rejected resources are NACKed and the loop goes on; any other error
    /// ends it. After cancellation nothing more is sent.
    pub async fn run(
        &self,
        stream: &mut DeltaDiscoveryStream,
        cancel: CancellationToken,
    ) -> SyncResult<()> {
        for resource_type in &self.types {
            stream.subscribe(resource_type).await?;
        }

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = stream.receive() => received?,
            };
            let Some(upstream) = received else {
                tracing::info!("stream closed by peer");
                return Ok(());
            };
            let resource_type = upstream.resource_type.clone();
            let initial = upstream.is_initial;

            let report = self.callbacks.on_resources_received(upstream).await?;

            if !initial && !self.response_backoff.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.response_backoff) => {}
                }
            }
            if cancel.is_cancelled() {
                return Ok(());
            }

            match report.rejection {
                None => stream.ack(&resource_type).await?,
                Some(rejection) => {
                    tracing::warn!(
                        resource_type = %resource_type,
                        rejected = rejection.len(),
                        "rejecting resources"
                    );
                    stream.nack(&resource_type, &rejection.to_string()).await?;
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("types", &self.types)
            .field("response_backoff", &self.response_backoff)
            .finish_non_exhaustive()
    }
}
