//! Message transports.
//!
//! A connection is split into a [`MessageSink`] and a [`MessageSource`] so one
//! task can block on receiving while another sends.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::KdsCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::KdsMessage;

/// Sending half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, msg: KdsMessage) -> ProtocolResult<()>;
}

/// Receiving half of a connection.
///
/// `recv` must be cancel-safe: dropping the future before it completes must
/// not lose a message.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` on clean end of stream.
    async fn recv(&mut self) -> ProtocolResult<Option<KdsMessage>>;
}

/// Both halves of one connection.
pub struct Connection {
    pub sink: Box<dyn MessageSink>,
    pub source: Box<dyn MessageSource>,
}

impl Connection {
    pub fn new(sink: impl MessageSink + 'static, source: impl MessageSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }

    pub fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageSource>) {
        (self.sink, self.source)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-process channels
// ---------------------------------------------------------------------------

/// Sending half of an in-process connection. Frames are encoded so the
/// in-process path exercises the same codec as TCP.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, msg: KdsMessage) -> ProtocolResult<()> {
        let frame = KdsCodec::encode(&msg)?;
        self.tx.send(frame).await.map_err(|_| ProtocolError::Closed)
    }
}

pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> ProtocolResult<Option<KdsMessage>> {
        match self.rx.recv().await {
            Some(frame) => KdsCodec::decode(&frame).map(|(msg, _)| Some(msg)),
            None => Ok(None),
        }
    }
}

/// Two connected in-process endpoints.
///
/// Dropping the sink of one side ends the stream seen by the other.
pub fn channel_pair(buffer: usize) -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::channel(buffer);
    let (b_tx, b_rx) = mpsc::channel(buffer);
    let a = Connection::new(ChannelSink { tx: a_tx }, ChannelSource { rx: b_rx });
    let b = Connection::new(ChannelSink { tx: b_tx }, ChannelSource { rx: a_rx });
    (a, b)
}

// ---------------------------------------------------------------------------
// Framed TCP
// ---------------------------------------------------------------------------

pub struct TcpSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl MessageSink for TcpSink {
    async fn send(&mut self, msg: KdsMessage) -> ProtocolResult<()> {
        let frame = KdsCodec::encode(&msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

pub struct TcpSource {
    reader: OwnedReadHalf,
    buf: BytesMut,
}

#[async_trait]
impl MessageSource for TcpSource {
    async fn recv(&mut self) -> ProtocolResult<Option<KdsMessage>> {
        loop {
            if let Some(msg) = KdsCodec::decode_frame(&mut self.buf)? {
                return Ok(Some(msg));
            }
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::FramingError(format!(
                    "connection closed with {} bytes of a partial frame",
                    self.buf.len()
                )));
            }
        }
    }
}

/// Wrap a TCP stream in the length-prefixed framing.
pub fn tcp_connection(stream: TcpStream) -> Connection {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    Connection::new(
        TcpSink { writer },
        TcpSource {
            reader,
            buf: BytesMut::with_capacity(8 * 1024),
        },
    )
}
