//! Connected IPC clients
//!
//! A `Client` is one accepted connection: its stream, the events it
//! subscribed to, and the bytes read or queued but not yet processed. The
//! `ClientRegistry` is the set of live clients, keyed by socket descriptor
//! and kept in registration order.
//!
//! Nothing here blocks. Reads take whatever the socket has; writes go into an
//! outbound buffer that is flushed as far as the socket allows and finished
//! later when the reactor sees the socket writable.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::{Buf, BytesMut};
use nix::sys::socket::{shutdown, Shutdown};
use thiserror::Error;
use tilewm_ipc::{IpcCodec, Message, ProtocolError};
use tokio::io::{Interest, Ready};
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Bytes reserved in the inbound buffer before each read
const READ_CHUNK: usize = 8 * 1024;

/// Why a message could not be queued for a client
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no such client")]
    UnknownClient,

    /// The client stopped reading and its backlog passed the limit
    #[error("{queued} bytes queued, limit is {limit}")]
    Backlog { queued: usize, limit: usize },

    #[error("failed to frame message: {0}")]
    Encode(#[source] ProtocolError),

    #[error("write failed: {0}")]
    Io(#[source] io::Error),
}

/// One accepted connection
#[derive(Debug)]
pub struct Client {
    fd: RawFd,
    stream: UnixStream,
    subscriptions: Vec<String>,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl Client {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream,
            subscriptions: Vec::new(),
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Add event names to this client's subscriptions, skipping names it
    /// already has (compared case-insensitively).
    pub fn subscribe<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = String>,
    {
        for event in events {
            if !self.is_subscribed(&event) {
                self.subscriptions.push(event);
            }
        }
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|name| name.eq_ignore_ascii_case(event))
    }

    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    /// Readiness to wait for: always readable, writable while output is queued.
    pub fn interest(&self) -> Interest {
        if self.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    pub async fn ready(&self) -> io::Result<Ready> {
        self.stream.ready(self.interest()).await
    }

    /// Read whatever the socket has into the inbound buffer.
    ///
    /// `Ok(0)` means the peer closed the connection.
    pub fn read_available(&mut self) -> io::Result<usize> {
        self.inbound.reserve(READ_CHUNK);
        self.stream.try_read_buf(&mut self.inbound)
    }

    /// Take the next complete message out of the inbound buffer.
    pub fn next_message(&mut self, codec: &mut IpcCodec) -> Result<Option<Message>, ProtocolError> {
        if self.inbound.is_empty() {
            return Ok(None);
        }
        codec.decode(&mut self.inbound)
    }

    /// Frame `message` onto the outbound buffer and write as much as the
    /// socket accepts right now. Only what is still unwritten afterwards
    /// counts against `limit`.
    fn queue(
        &mut self,
        codec: &mut IpcCodec,
        message: Message,
        limit: usize,
    ) -> Result<(), SendError> {
        codec
            .encode(message, &mut self.outbound)
            .map_err(SendError::Encode)?;

        self.flush().map_err(SendError::Io)?;

        if self.outbound.len() > limit {
            return Err(SendError::Backlog {
                queued: self.outbound.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Write queued output until it is gone or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.try_write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// All live clients in registration order
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Vec<Client>,
    codec: IpcCodec,
    max_backlog: usize,
}

impl ClientRegistry {
    /// `max_message_size` bounds inbound payloads, `max_backlog` bounds the
    /// unwritten output kept for one client.
    pub fn new(max_message_size: usize, max_backlog: usize) -> Self {
        Self {
            clients: Vec::new(),
            codec: IpcCodec::with_max_payload(max_message_size),
            max_backlog,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    /// Add a freshly accepted connection with no subscriptions.
    pub fn register(&mut self, stream: UnixStream) -> RawFd {
        let client = Client::new(stream);
        let fd = client.fd();

        // Each entry holds its descriptor open, so the kernel cannot hand
        // out a live one again.
        debug_assert!(self.find(fd).is_none(), "fd {} registered twice", fd);

        debug!("IPC client connected (fd {})", fd);
        self.clients.push(client);
        fd
    }

    pub fn find(&self, fd: RawFd) -> Option<&Client> {
        self.clients.iter().find(|c| c.fd == fd)
    }

    pub fn find_mut(&mut self, fd: RawFd) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.fd == fd)
    }

    /// Drop the client registered under `fd`, closing its connection.
    ///
    /// Returns `false` if no such client exists, which is not an error.
    pub fn remove(&mut self, fd: RawFd) -> bool {
        match self.clients.iter().position(|c| c.fd == fd) {
            Some(index) => {
                self.clients.remove(index);
                debug!("IPC client disconnected (fd {})", fd);
                true
            }
            None => false,
        }
    }

    /// Read from a client. `Ok(0)` means the peer hung up.
    pub fn read_available(&mut self, fd: RawFd) -> io::Result<usize> {
        match self.find_mut(fd) {
            Some(client) => client.read_available(),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    /// Next complete message buffered for a client, if any.
    pub fn next_message(&mut self, fd: RawFd) -> Result<Option<Message>, ProtocolError> {
        let Self { clients, codec, .. } = self;
        match clients.iter_mut().find(|c| c.fd == fd) {
            Some(client) => client.next_message(codec),
            None => Ok(None),
        }
    }

    /// Queue one message for one client.
    pub fn send(&mut self, fd: RawFd, kind: u32, payload: &[u8]) -> Result<(), SendError> {
        let Self {
            clients,
            codec,
            max_backlog,
        } = self;
        let client = clients
            .iter_mut()
            .find(|c| c.fd == fd)
            .ok_or(SendError::UnknownClient)?;
        client.queue(codec, Message::new(kind, payload.to_vec()), *max_backlog)
    }

    /// Send an event to every client subscribed to `event`.
    ///
    /// Delivery is best-effort: a failed write is left for the next read or
    /// write on that client to surface. A client whose backlog overflows is
    /// dropped here. Returns the number of clients the event was queued for.
    pub fn broadcast(&mut self, event: &str, code: u32, payload: &[u8]) -> usize {
        let Self {
            clients,
            codec,
            max_backlog,
        } = self;
        let message = Message::new(code, payload.to_vec());
        let mut delivered = 0;
        let mut overflowed = Vec::new();

        for client in clients.iter_mut().filter(|c| c.is_subscribed(event)) {
            match client.queue(codec, message.clone(), *max_backlog) {
                Ok(()) => delivered += 1,
                Err(SendError::Backlog { queued, limit }) => {
                    warn!(
                        "IPC client (fd {}) is not reading: {} bytes queued, limit is {}",
                        client.fd, queued, limit
                    );
                    overflowed.push(client.fd);
                }
                Err(e) => {
                    debug!("Could not send {} event to fd {}: {}", event, client.fd, e);
                    delivered += 1;
                }
            }
        }

        for fd in overflowed {
            self.remove(fd);
        }
        delivered
    }

    /// Try to write queued output for every client, dropping clients whose
    /// socket reports a hard error.
    pub fn flush_all(&mut self) {
        let mut dead = Vec::new();
        for client in self.clients.iter_mut().filter(|c| c.pending_output() > 0) {
            if let Err(e) = client.flush() {
                debug!("Write to IPC client (fd {}) failed: {}", client.fd, e);
                dead.push(client.fd);
            }
        }
        for fd in dead {
            self.remove(fd);
        }
    }

    /// Shut down both directions of every connection, then forget them all.
    pub fn shutdown(&mut self) {
        for client in &self.clients {
            if let Err(e) = shutdown(client.fd, Shutdown::Both) {
                debug!("shutdown() on IPC client fd {} failed: {}", client.fd, e);
            }
        }
        self.clients.clear();
    }
}

#[cfg(test)]
impl ClientRegistry {
    /// Wait until all queued output has reached the sockets.
    pub(crate) async fn settle(&mut self) {
        while let Some(fd) = self
            .clients
            .iter()
            .find(|c| c.pending_output() > 0)
            .map(Client::fd)
        {
            if let Some(client) = self.find(fd) {
                client.ready().await.unwrap();
            }
            self.flush_all();
        }
    }
}
