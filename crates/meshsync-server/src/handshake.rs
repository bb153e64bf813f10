//! First frame of every zone connection.
//!
//! A zone opens each connection with a [`StreamOpen`] naming itself and the
//! direction the connection serves. Global answers a bad opening with an
//! error frame and closes.

use meshsync_protocol::{
    features, BuildInfo, Connection, KdsMessage, ProtocolError, StreamKind, StreamOpen,
    PROTOCOL_VERSION,
};

use crate::error::{ServerError, ServerResult};

/// Error code of a rejected handshake.
pub const HANDSHAKE_ERROR_CODE: u32 = 1;

/// Announce this zone on a freshly dialed connection.
pub async fn open_stream(conn: &mut Connection, zone: &str, kind: StreamKind) -> ServerResult<()> {
    let open = StreamOpen {
        version: PROTOCOL_VERSION,
        zone: zone.to_string(),
        kind,
        features: features::supported(),
        build: BuildInfo::current(),
    };
    conn.sink.send(KdsMessage::StreamOpen(open)).await?;
    Ok(())
}

/// Wait for a zone's opening frame and check it.
pub async fn accept_stream(conn: &mut Connection) -> ServerResult<StreamOpen> {
    let open = match conn.source.recv().await? {
        Some(KdsMessage::StreamOpen(open)) => open,
        Some(other) => {
            return reject(conn, format!("expected StreamOpen, got {}", other.type_name())).await;
        }
        None => return Err(ProtocolError::Closed.into()),
    };
    if open.version != PROTOCOL_VERSION {
        let reason = ProtocolError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: open.version,
        };
        return reject(conn, reason.to_string()).await;
    }
    if open.zone.is_empty() {
        return reject(conn, "zone name must not be empty".to_string()).await;
    }
    Ok(open)
}

async fn reject<T>(conn: &mut Connection, reason: String) -> ServerResult<T> {
    let frame = KdsMessage::Error {
        code: HANDSHAKE_ERROR_CODE,
        message: reason.clone(),
    };
    if let Err(e) = conn.sink.send(frame).await {
        tracing::debug!(error = %e, "could not report handshake error");
    }
    Err(ServerError::Handshake(reason))
}
