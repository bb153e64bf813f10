use bytes::{Buf, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{KdsMessage, MAX_MESSAGE_SIZE};

const HEADER_LEN: usize = 5;

/// Codec for encoding/decoding replication protocol messages.
pub struct KdsCodec;

impl KdsCodec {
    /// Encode a message with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(msg: &KdsMessage) -> ProtocolResult<Vec<u8>> {
        let payload = Self::encode_payload(msg)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(KdsMessage, usize)> {
        match Self::frame_len(data)? {
            Some(total) => {
                let msg = Self::decode_body(data[4], &data[HEADER_LEN..total])?;
                Ok((msg, total))
            }
            None => Err(ProtocolError::FramingError(format!(
                "incomplete frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Decode one message from the front of `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame.
    pub fn decode_frame(buf: &mut BytesMut) -> ProtocolResult<Option<KdsMessage>> {
        let Some(total) = Self::frame_len(buf)? else {
            return Ok(None);
        };
        let msg = Self::decode_body(buf[4], &buf[HEADER_LEN..total])?;
        buf.advance(total);
        Ok(Some(msg))
    }

    /// Encode payload only (no framing).
    pub fn encode_payload(msg: &KdsMessage) -> ProtocolResult<Vec<u8>> {
        bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode payload only (no framing).
    pub fn decode_payload(data: &[u8]) -> ProtocolResult<KdsMessage> {
        bincode::deserialize(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Total length of the frame at the front of `data`, or `None` if more
    /// bytes are needed.
    fn frame_len(data: &[u8]) -> ProtocolResult<Option<usize>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let total = 4 + len;
        if data.len() < total {
            return Ok(None);
        }
        Ok(Some(total))
    }

    fn decode_body(tag: u8, payload: &[u8]) -> ProtocolResult<KdsMessage> {
        let msg = Self::decode_payload(payload)?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        Ok(msg)
    }
}
