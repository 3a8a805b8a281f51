//! Error types for the IPC wire protocol

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while framing, sending or receiving IPC messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The first six bytes of a frame were not `"i3-ipc"`
    #[error("Invalid message header: expected \"i3-ipc\" magic")]
    BadMagic,

    /// The announced payload length is above the configured bound
    #[error("Message payload of {length} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { length: usize, max: usize },

    /// A text payload was not valid UTF-8
    #[error("Message payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    /// Failed to connect to the IPC socket
    #[error("Failed to connect to IPC socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection, possibly in the middle of a frame
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// A reply arrived with a different type code than the request
    #[error("Received reply of type {actual} but expected {expected}")]
    UnexpectedReply { expected: u32, actual: u32 },

    /// Failed to serialize a payload to JSON
    #[error("Failed to serialize payload: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize a payload from JSON
    #[error("Failed to deserialize payload: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// Any other socket error
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),
}
