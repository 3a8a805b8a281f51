//! Blocking IPC client
//!
//! A deliberately simple client for command-line tools: connect, send one
//! request, read the reply, optionally keep reading events. The daemon side
//! never uses this; it drives `IpcCodec` from its own non-blocking loop.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{IpcCodec, Message};
use crate::types::{is_event, MessageType};
use crate::ProtocolError;

/// Environment variable the daemon exports with its socket path
pub const SOCKET_ENV: &str = "TILEWM_SOCK";

/// Size of each read from the socket
const READ_CHUNK: usize = 8 * 1024;

/// File name of the socket inside the runtime directory
const SOCKET_NAME: &str = "ipc.sock";

/// Socket path advertised through `$TILEWM_SOCK`, if set and non-empty.
pub fn socket_path_from_env() -> Option<PathBuf> {
    std::env::var_os(SOCKET_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Per-user socket path used when nothing else names one
///
/// `$XDG_RUNTIME_DIR/tilewm/ipc.sock` if the runtime directory is known,
/// otherwise `/tmp/tilewm-$UID/ipc.sock`.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR").filter(|dir| !dir.is_empty()) {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join("tilewm").join(SOCKET_NAME),
        None => {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
            let uid = unsafe { nix::libc::getuid() };
            PathBuf::from(format!("/tmp/tilewm-{}", uid)).join(SOCKET_NAME)
        }
    }
}

/// A blocking connection to the daemon's IPC socket
///
/// Events that arrive while waiting for a reply are queued and handed out
/// later by `next_event()`, so a subscribed client can still issue requests.
///
/// # Example
///
/// ```ignore
/// let mut conn = Connection::connect("/run/user/1000/tilewm/ipc-socket.42")?;
/// let reply = conn.request(MessageType::GetVersion, b"")?;
/// println!("{}", reply.payload_str()?);
/// ```
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    codec: IpcCodec,
    buffer: BytesMut,
    pending_events: VecDeque<Message>,
}

impl Connection {
    /// Connect to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ConnectionFailed` if the socket does not exist
    /// or refuses the connection.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let stream =
            UnixStream::connect(path).map_err(|source| ProtocolError::ConnectionFailed {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            codec: IpcCodec::new(),
            buffer: BytesMut::with_capacity(READ_CHUNK),
            pending_events: VecDeque::new(),
        }
    }

    /// Send one framed message with a raw type code.
    pub fn send(&mut self, kind: u32, payload: &[u8]) -> Result<(), ProtocolError> {
        let mut frame = BytesMut::new();
        self.codec
            .encode(Message::new(kind, payload.to_vec()), &mut frame)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Block until one complete message (reply or event) has arrived.
    pub fn receive(&mut self) -> Result<Message, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = self.codec.decode(&mut self.buffer)? {
                return Ok(message);
            }

            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::UnexpectedReply` if the next non-event message
    /// carries a different type code than the request.
    pub fn request(&mut self, kind: MessageType, payload: &[u8]) -> Result<Message, ProtocolError> {
        self.send(kind.code(), payload)?;

        loop {
            let message = self.receive()?;
            if is_event(message.kind) {
                self.pending_events.push_back(message);
                continue;
            }
            if message.kind != kind.code() {
                return Err(ProtocolError::UnexpectedReply {
                    expected: kind.code(),
                    actual: message.kind,
                });
            }
            return Ok(message);
        }
    }

    /// Send a request and deserialize the JSON reply.
    pub fn request_json<T: DeserializeOwned>(
        &mut self,
        kind: MessageType,
        payload: &[u8],
    ) -> Result<T, ProtocolError> {
        let reply = self.request(kind, payload)?;
        serde_json::from_slice(&reply.payload).map_err(ProtocolError::DeserializeFailed)
    }

    /// Subscribe to the given event names; returns the daemon's verdict.
    pub fn subscribe(&mut self, events: &[&str]) -> Result<bool, ProtocolError> {
        let payload = serde_json::to_vec(events).map_err(ProtocolError::SerializeFailed)?;
        let reply: crate::SuccessReply = self.request_json(MessageType::Subscribe, &payload)?;
        Ok(reply.success)
    }

    /// Block until the next event arrives.
    pub fn next_event(&mut self) -> Result<Message, ProtocolError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        loop {
            let message = self.receive()?;
            if is_event(message.kind) {
                return Ok(message);
            }
            tracing::debug!("Ignoring unsolicited reply of type {}", message.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, VersionReply};

    /// Minimal peer: reads one frame from `server` and answers with `replies`.
    fn serve_once(mut server: UnixStream, replies: Vec<Message>) -> std::thread::JoinHandle<Message> {
        std::thread::spawn(move || {
            let mut peer = Connection::from_stream(server.try_clone().unwrap());
            let request = peer.receive().unwrap();
            let mut codec = IpcCodec::new();
            for reply in replies {
                let mut buf = BytesMut::new();
                codec.encode(reply, &mut buf).unwrap();
                server.write_all(&buf).unwrap();
            }
            request
        })
    }

    #[test]
    fn test_request_returns_matching_reply() {
        let (client, server) = UnixStream::pair().unwrap();
        let version = r#"{"major":4,"minor":5,"patch":0,"human_readable":"4.5"}"#;
        let handle = serve_once(server, vec![Message::new(7, version.as_bytes().to_vec())]);

        let mut conn = Connection::from_stream(client);
        let reply: VersionReply = conn.request_json(MessageType::GetVersion, b"").unwrap();
        assert_eq!(reply.major, 4);
        assert_eq!(reply.human_readable, "4.5");

        let request = handle.join().unwrap();
        assert_eq!(request.kind, 7);
        assert!(request.payload.is_empty());
    }

    #[test]
    fn test_events_before_reply_are_queued() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = serve_once(
            server,
            vec![
                Message::new(EventType::Workspace.code(), &br#"{"change":"focus"}"#[..]),
                Message::new(5, &b"[]"[..]),
            ],
        );

        let mut conn = Connection::from_stream(client);
        let reply = conn.request(MessageType::GetMarks, b"").unwrap();
        assert_eq!(reply.payload_str().unwrap(), "[]");

        let event = conn.next_event().unwrap();
        assert_eq!(event.kind, EventType::Workspace.code());
        assert_eq!(event.payload_str().unwrap(), r#"{"change":"focus"}"#);

        handle.join().unwrap();
    }

    #[test]
    fn test_mismatched_reply_type() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = serve_once(server, vec![Message::new(3, &b"[]"[..])]);

        let mut conn = Connection::from_stream(client);
        let err = conn.request(MessageType::GetMarks, b"").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedReply {
                expected: 5,
                actual: 3
            }
        ));

        handle.join().unwrap();
    }

    #[test]
    fn test_peer_close_mid_frame() {
        let (client, mut server) = UnixStream::pair().unwrap();
        server.write_all(b"i3-ipc\x10\x00").unwrap();
        drop(server);

        let mut conn = Connection::from_stream(client);
        assert!(matches!(
            conn.receive(),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_default_socket_path_ends_in_tilewm_dir() {
        let path = default_socket_path();
        assert_eq!(path.file_name().unwrap(), "ipc.sock");
        assert!(path
            .parent()
            .unwrap()
            .to_string_lossy()
            .contains("tilewm"));
    }

    #[test]
    fn test_connect_to_missing_socket() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = Connection::connect(temp_dir.path().join("nope.sock")).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionFailed { .. }));
    }
}
