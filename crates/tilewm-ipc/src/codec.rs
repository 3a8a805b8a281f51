//! Framing for the `"i3-ipc"` wire format
//!
//! Every message on the socket, in either direction, looks like this:
//!
//! ```text
//! +----------+--------------+------------+-------------------+
//! | "i3-ipc" | length (u32) | type (u32) | payload[length]   |
//! +----------+--------------+------------+-------------------+
//!   6 bytes     4 bytes LE     4 bytes LE
//! ```
//!
//! `IpcCodec` implements `tokio_util::codec::{Decoder, Encoder}` over a
//! `BytesMut`. The decoder never assumes a single read produced a whole
//! frame: it returns `Ok(None)` until the header and then the full payload
//! are buffered, so the same buffer can be fed across any number of reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ProtocolError;

/// Magic tag that starts every frame
pub const MAGIC: &[u8; 6] = b"i3-ipc";

/// Size of the fixed header: magic + length + type
pub const HEADER_LEN: usize = MAGIC.len() + 4 + 4;

/// Default upper bound on an inbound payload (64 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Request, reply or event type code
    pub kind: u32,
    /// Raw payload bytes (JSON, or plain text for `RUN_COMMAND` requests)
    pub payload: Bytes,
}

impl Message {
    pub fn new(kind: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Interpret the payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(&self.payload).map_err(ProtocolError::InvalidUtf8)
    }

    /// Size of this message once framed.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Codec for `"i3-ipc"` frames
///
/// The payload bound only applies to decoding: it protects the daemon from a
/// peer announcing an absurd length. Outbound messages are limited only by
/// what fits in the `u32` length field.
#[derive(Debug, Clone)]
pub struct IpcCodec {
    max_payload: usize,
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl IpcCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that rejects inbound payloads above `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Decoder for IpcCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        // Reject a bad tag as soon as the bytes disagree, not only once the
        // whole header has arrived.
        let seen = src.len().min(MAGIC.len());
        if src[..seen] != MAGIC[..seen] {
            return Err(ProtocolError::BadMagic);
        }

        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let mut header = &src[MAGIC.len()..HEADER_LEN];
        let length = header.get_u32_le() as usize;
        let kind = header.get_u32_le();

        if length > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                length,
                max: self.max_payload,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();

        Ok(Some(Message { kind, payload }))
    }
}

impl Encoder<Message> for IpcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let length = u32::try_from(item.payload.len()).map_err(|_| {
            ProtocolError::PayloadTooLarge {
                length: item.payload.len(),
                max: u32::MAX as usize,
            }
        })?;

        dst.reserve(item.encoded_len());
        dst.put_slice(MAGIC);
        dst.put_u32_le(length);
        dst.put_u32_le(item.kind);
        dst.put_slice(&item.payload);

        Ok(())
    }
}
