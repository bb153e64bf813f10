//! Client side of the delta discovery protocol.
//!
//! Per resource type the stream subscribes once, then alternates between
//! receiving a response and acknowledging or rejecting it. The peer keeps at
//! most one response outstanding per type, so the nonce echoed back in an
//! ACK releases the next one.

use std::collections::BTreeMap;
use std::sync::Arc;

use meshsync_protocol::{
    from_wire, Connection, DeltaDiscoveryRequest, DeltaDiscoveryResponse, ErrorDetail,
    KdsMessage, MessageSink, MessageSource, NodeInfo, WILDCARD,
};
use meshsync_types::{ResourceType, TypeRegistry};

use crate::error::{SyncError, SyncResult};
use crate::upstream::UpstreamResponse;

/// Error code carried by NACKs.
pub const NACK_ERROR_CODE: u32 = 3;

#[derive(Debug, Default)]
struct TypeState {
    latest_received: Option<String>,
    latest_acked: Option<String>,
}

/// One connection's discovery stream, consuming any number of types.
pub struct DeltaDiscoveryStream {
    sink: Box<dyn MessageSink>,
    source: Box<dyn MessageSource>,
    registry: Arc<TypeRegistry>,
    node: NodeInfo,
    types: BTreeMap<ResourceType, TypeState>,
}

impl DeltaDiscoveryStream {
    pub fn new(conn: Connection, registry: Arc<TypeRegistry>, node: NodeInfo) -> Self {
        let (sink, source) = conn.split();
        Self {
            sink,
            source,
            registry,
            node,
            types: BTreeMap::new(),
        }
    }

    fn request(
        &self,
        resource_type: &ResourceType,
        response_nonce: String,
        error_detail: Option<ErrorDetail>,
    ) -> KdsMessage {
        KdsMessage::Request(DeltaDiscoveryRequest {
            node: self.node.clone(),
            type_url: resource_type.clone(),
            resource_names_subscribe: vec![WILDCARD.to_string()],
            response_nonce,
            error_detail,
        })
    }

    /// Subscribe to every resource of `resource_type`. Resubscribing resets
    /// the nonce bookkeeping, so the next response is a full snapshot.
    pub async fn subscribe(&mut self, resource_type: &ResourceType) -> SyncResult<()> {
        self.registry.descriptor(resource_type)?;
        self.types.insert(resource_type.clone(), TypeState::default());
        tracing::debug!(resource_type = %resource_type, "subscribing");
        let msg = self.request(resource_type, String::new(), None);
        self.sink.send(msg).await?;
        Ok(())
    }

    /// Wait for the next response of any subscribed type. `None` on clean
    /// end of stream.
    pub async fn receive(&mut self) -> SyncResult<Option<UpstreamResponse>> {
        match self.source.recv().await? {
            None => Ok(None),
            Some(KdsMessage::Response(resp)) => self.decode(resp).map(Some),
            Some(KdsMessage::Error { code, message }) => Err(SyncError::Remote { code, message }),
            Some(other) => Err(SyncError::Violation(format!(
                "unexpected {} message on a discovery stream",
                other.type_name()
            ))),
        }
    }

    fn decode(&mut self, resp: DeltaDiscoveryResponse) -> SyncResult<UpstreamResponse> {
        let Some(state) = self.types.get_mut(&resp.type_url) else {
            return Err(SyncError::Violation(format!(
                "response for unsubscribed type {}",
                resp.type_url
            )));
        };

        let mut added = self.registry.new_list(&resp.type_url)?;
        for wire in resp.resources {
            added.push(from_wire(&resp.type_url, wire)?)?;
        }
        let is_initial = state.latest_acked.is_none();
        state.latest_received = Some(resp.nonce.clone());

        tracing::debug!(
            resource_type = %resp.type_url,
            nonce = %resp.nonce,
            added = added.len(),
            removed = resp.removed_resources.len(),
            initial = is_initial,
            "received response"
        );
        Ok(UpstreamResponse {
            control_plane_id: resp.control_plane_id,
            resource_type: resp.type_url,
            added,
            removed: resp.removed_resources,
            nonce: resp.nonce,
            is_initial,
        })
    }

    /// Acknowledge the latest response of `resource_type`. No-op if nothing
    /// was received for it.
    pub async fn ack(&mut self, resource_type: &ResourceType) -> SyncResult<()> {
        let Some(nonce) = self
            .types
            .get_mut(resource_type)
            .and_then(|state| {
                let nonce = state.latest_received.clone()?;
                state.latest_acked = Some(nonce.clone());
                Some(nonce)
            })
        else {
            return Ok(());
        };
        tracing::debug!(resource_type = %resource_type, nonce = %nonce, "sending ACK");
        let msg = self.request(resource_type, nonce, None);
        self.sink.send(msg).await?;
        Ok(())
    }

    /// Reject the latest response of `resource_type`. The request carries the
    /// previously acknowledged nonce, empty if none.
    pub async fn nack(&mut self, resource_type: &ResourceType, error: &str) -> SyncResult<()> {
        let Some(state) = self.types.get(resource_type) else {
            return Ok(());
        };
        if state.latest_received.is_none() {
            return Ok(());
        }
        let nonce = state.latest_acked.clone().unwrap_or_default();
        tracing::warn!(resource_type = %resource_type, nonce = %nonce, error, "sending NACK");
        let msg = self.request(
            resource_type,
            nonce,
            Some(ErrorDetail {
                code: NACK_ERROR_CODE,
                message: error.to_string(),
            }),
        );
        self.sink.send(msg).await?;
        Ok(())
    }
}

impl std::fmt::Debug for DeltaDiscoveryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaDiscoveryStream")
            .field("node", &self.node.id)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}
