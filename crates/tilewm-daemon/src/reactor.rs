//! The event loop
//!
//! One `Reactor` owns every IPC resource: the listening sockets, the client
//! registry, the window manager and the display connection. It runs on a
//! single thread and handles one wake-up at a time:
//!
//! 1. Prepare: flush the display connection and any queued client output.
//! 2. Wait for the first of: shutdown, display or keyboard readable, an
//!    event published from outside, a pending connection, a client ready.
//! 3. Drain display and keyboard events, then handle whatever woke the loop.
//!
//! Requests from one client are answered in the order they arrived. Events
//! reach subscribers in registration order.

use std::future::{pending, Future};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use futures::future::select_all;
use futures::FutureExt;
use tilewm_config::GlobalConfig;
use tilewm_ipc::Message;
use tokio::io::unix::AsyncFd;
use tokio::io::{Interest, Ready};
use tokio::net::UnixStream;
use tracing::{debug, error, info, trace, warn};

use crate::client::{ClientRegistry, SendError};
use crate::events::{EventPublisher, EventReceiver, IpcContext, PublishedEvent};
use crate::handlers::Dispatcher;
use crate::ipc::IpcListener;
use crate::wm::{DisplayConnection, WindowManager};

/// Limits and advertised values for one reactor
#[derive(Debug, Clone)]
pub struct ReactorSettings {
    /// Largest request payload accepted from a client
    pub max_message_size: usize,
    /// Largest amount of unwritten output kept for one client
    pub max_client_backlog: usize,
    /// Socket path given to bars that do not name their own
    pub socket_path: Option<PathBuf>,
}

impl ReactorSettings {
    pub fn from_config(global: &GlobalConfig, socket_path: Option<PathBuf>) -> Self {
        Self {
            max_message_size: global.max_message_size,
            max_client_backlog: global.max_client_backlog,
            socket_path,
        }
    }
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default(), None)
    }
}

/// What ended a wait
enum Wake {
    Display(io::Result<()>),
    Keyboard(io::Result<()>),
    Published(PublishedEvent),
    Accepted(usize, io::Result<UnixStream>),
    Client(RawFd, io::Result<Ready>),
}

pub struct Reactor<W, D> {
    wm: W,
    display: D,
    display_watch: Option<AsyncFd<WatchedFd>>,
    keyboard_watch: Option<AsyncFd<WatchedFd>>,
    listeners: Vec<IpcListener>,
    clients: ClientRegistry,
    dispatcher: Dispatcher,
    publisher: EventPublisher,
    events: EventReceiver,
}

impl<W, D> Reactor<W, D>
where
    W: WindowManager,
    D: DisplayConnection<W>,
{
    /// Build a reactor. Must be called from within a tokio runtime.
    ///
    /// An empty `listeners` list is allowed: the loop then only serves the
    /// display connection and published events.
    pub fn new(wm: W, display: D, listeners: Vec<IpcListener>, settings: ReactorSettings) -> Self {
        if listeners.is_empty() {
            warn!("No IPC socket available, IPC disabled");
        }

        let display_watch = display.display_fd().and_then(|fd| watch("display", fd));
        let keyboard_watch = display.keyboard_fd().and_then(|fd| watch("keyboard", fd));
        let (publisher, events) = EventPublisher::channel();
        let socket_path = settings
            .socket_path
            .as_ref()
            .map(|path| path.display().to_string());

        Self {
            wm,
            display,
            display_watch,
            keyboard_watch,
            listeners,
            clients: ClientRegistry::new(settings.max_message_size, settings.max_client_backlog),
            dispatcher: Dispatcher::new(socket_path),
            publisher,
            events,
        }
    }

    /// Handle for publishing events from outside the loop
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Send an event to subscribers right away.
    pub fn publish(&mut self, name: &str, payload: &str) {
        IpcContext::new(&mut self.clients).publish(name, payload);
    }

    pub fn wm(&self) -> &W {
        &self.wm
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Run until `shutdown` completes, then close every client connection
    /// and listening socket.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Entering event loop ({} listening socket(s))",
            self.listeners.len()
        );

        loop {
            self.prepare();

            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = wait_readable(self.display_watch.as_ref()) => Wake::Display(result),
                result = wait_readable(self.keyboard_watch.as_ref()) => Wake::Keyboard(result),
                Some(event) = self.events.recv() => Wake::Published(event),
                (index, result) = accept_any(&self.listeners) => Wake::Accepted(index, result),
                (fd, result) = next_ready_client(&self.clients) => Wake::Client(fd, result),
            };

            self.check();

            match wake {
                Wake::Display(result) => {
                    if let Err(e) = result {
                        error!("Lost watch on display connection: {}", e);
                        self.display_watch = None;
                    }
                }
                Wake::Keyboard(result) => {
                    if let Err(e) = result {
                        error!("Lost watch on keyboard connection: {}", e);
                        self.keyboard_watch = None;
                    }
                }
                Wake::Published(event) => {
                    IpcContext::new(&mut self.clients).publish_event(&event);
                }
                Wake::Accepted(index, result) => self.accept_clients(index, result),
                Wake::Client(fd, result) => self.service_client(fd, result),
            }
        }

        self.shutdown();
    }

    fn prepare(&mut self) {
        self.display.flush();
        self.clients.flush_all();
    }

    /// Handle every display and keyboard event queued so far.
    fn check(&mut self) {
        let mut ipc = IpcContext::new(&mut self.clients);
        self.display.drain_events(&mut self.wm, &mut ipc);
        self.display.drain_keyboard_events(&mut self.wm, &mut ipc);
        if ipc.render_requested() {
            self.wm.render();
        }
    }

    /// Register the accepted connection, then everything else already
    /// pending on the same socket.
    fn accept_clients(&mut self, index: usize, first: io::Result<UnixStream>) {
        let mut result = first;
        loop {
            match result {
                Ok(stream) => {
                    self.clients.register(stream);
                }
                Err(e) => {
                    warn!(
                        "accept() on IPC socket fd {} failed: {}",
                        self.listeners[index].fd(),
                        e
                    );
                    return;
                }
            }

            match self.listeners[index].accept().now_or_never() {
                Some(next) => result = next,
                None => return,
            }
        }
    }

    fn service_client(&mut self, fd: RawFd, ready: io::Result<Ready>) {
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                debug!("IPC client (fd {}) failed: {}", fd, e);
                self.clients.remove(fd);
                return;
            }
        };

        if ready.is_writable() {
            if let Some(client) = self.clients.find_mut(fd) {
                if let Err(e) = client.flush() {
                    debug!("Write to IPC client (fd {}) failed: {}", fd, e);
                    self.clients.remove(fd);
                    return;
                }
            }
        }

        if !(ready.is_readable() || ready.is_read_closed()) {
            return;
        }

        match self.clients.read_available(fd) {
            Ok(0) => {
                self.clients.remove(fd);
                return;
            }
            Ok(n) => trace!("Read {} bytes from IPC client (fd {})", n, fd),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                debug!("Read from IPC client (fd {}) failed: {}", fd, e);
                self.clients.remove(fd);
                return;
            }
        }

        loop {
            let message = match self.clients.next_message(fd) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("Closing IPC client (fd {}): {}", fd, e);
                    self.clients.remove(fd);
                    break;
                }
            };

            self.handle_message(fd, message);
            if self.clients.find(fd).is_none() {
                break;
            }
        }
    }

    fn handle_message(&mut self, fd: RawFd, message: Message) {
        let mut ipc = IpcContext::new(&mut self.clients);
        let reply = self
            .dispatcher
            .dispatch(&mut self.wm, &mut ipc, fd, &message);
        if ipc.render_requested() {
            self.wm.render();
        }

        let Some(reply) = reply else {
            return;
        };
        match self.clients.send(fd, reply.kind.code(), &reply.payload) {
            Ok(()) | Err(SendError::UnknownClient) => {}
            Err(e) => {
                warn!("Dropping IPC client (fd {}): {}", fd, e);
                self.clients.remove(fd);
            }
        }
    }

    fn shutdown(&mut self) {
        info!(
            "Shutting down IPC: {} client(s), {} listening socket(s)",
            self.clients.len(),
            self.listeners.len()
        );
        self.clients.shutdown();
        self.listeners.clear();
    }
}

/// Descriptor owned by the display connection. The reactor only polls it;
/// the display keeps it open for as long as the reactor lives.
#[derive(Debug)]
struct WatchedFd(RawFd);

impl AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

fn watch(name: &str, fd: RawFd) -> Option<AsyncFd<WatchedFd>> {
    match AsyncFd::with_interest(WatchedFd(fd), Interest::READABLE) {
        Ok(watch) => Some(watch),
        Err(e) => {
            error!("Cannot watch {} connection (fd {}): {}", name, fd, e);
            None
        }
    }
}

async fn wait_readable(watch: Option<&AsyncFd<WatchedFd>>) -> io::Result<()> {
    let Some(watch) = watch else {
        return pending().await;
    };
    let mut guard = watch.readable().await?;
    guard.clear_ready();
    Ok(())
}

async fn accept_any(listeners: &[IpcListener]) -> (usize, io::Result<UnixStream>) {
    if listeners.is_empty() {
        return pending().await;
    }
    let accepts = listeners
        .iter()
        .enumerate()
        .map(|(index, listener)| Box::pin(async move { (index, listener.accept().await) }));
    let (first, _, _) = select_all(accepts).await;
    first
}

async fn next_ready_client(clients: &ClientRegistry) -> (RawFd, io::Result<Ready>) {
    if clients.is_empty() {
        return pending().await;
    }
    let waits = clients
        .iter()
        .map(|client| Box::pin(async move { (client.fd(), client.ready().await) }));
    let (first, _, _) = select_all(waits).await;
    first
}
