//! Event publishing
//!
//! Code running inside the reactor (command handlers, display drains) gets
//! an `IpcContext` and publishes synchronously. Anything outside the reactor
//! holds an `EventPublisher`, which forwards events over a channel that the
//! reactor drains on its next iteration.
//!
//! ```text
//! +----------------+      +--------+      +---------+      +-------------+
//! | EventPublisher | ---> | mpsc   | ---> | Reactor | ---> | subscribers |
//! +----------------+      +--------+      +---------+      +-------------+
//! ```

use tilewm_ipc::event_code;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::client::ClientRegistry;

/// An event waiting to be broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub name: String,
    pub code: u32,
    pub payload: String,
}

impl PublishedEvent {
    /// Event with the type code looked up from its name.
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: event_code(&name),
            name,
            payload: payload.into(),
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<PublishedEvent>;

/// Cloneable handle for publishing events from outside the reactor
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<PublishedEvent>,
}

impl EventPublisher {
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue an event for every client subscribed to `name`.
    ///
    /// Returns `false` once the reactor has gone away.
    pub fn publish(&self, name: &str, payload: impl Into<String>) -> bool {
        self.send(PublishedEvent::new(name, payload))
    }

    pub fn send(&self, event: PublishedEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping {} event, event loop has stopped", e.0.name);
                false
            }
        }
    }
}

/// What reactor-side code may do to the IPC layer while it runs
pub struct IpcContext<'a> {
    clients: &'a mut ClientRegistry,
    render_requested: bool,
}

impl<'a> IpcContext<'a> {
    pub fn new(clients: &'a mut ClientRegistry) -> Self {
        Self {
            clients,
            render_requested: false,
        }
    }

    /// Send an event to every subscriber of `name` right away.
    pub fn publish(&mut self, name: &str, payload: &str) {
        self.publish_with_code(name, event_code(name), payload);
    }

    pub fn publish_with_code(&mut self, name: &str, code: u32, payload: &str) {
        let delivered = self.clients.broadcast(name, code, payload.as_bytes());
        trace!("Published {} event to {} client(s)", name, delivered);
    }

    pub fn publish_event(&mut self, event: &PublishedEvent) {
        self.publish_with_code(&event.name, event.code, &event.payload);
    }

    /// Ask for the layout to be rendered once the current step finishes.
    pub fn request_render(&mut self) {
        self.render_requested = true;
    }

    pub fn render_requested(&self) -> bool {
        self.render_requested
    }

    pub fn clients(&mut self) -> &mut ClientRegistry {
        self.clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilewm_ipc::{EventType, GENERIC_EVENT_CODE};

    #[test]
    fn test_published_event_codes() {
        assert_eq!(
            PublishedEvent::new("mode", "{}").code,
            EventType::Mode.code()
        );
        assert_eq!(
            PublishedEvent::new("BarConfig_Update", "{}").code,
            EventType::BarconfigUpdate.code()
        );
        assert_eq!(
            PublishedEvent::new("tick", "{}").code,
            GENERIC_EVENT_CODE
        );
    }

    #[tokio::test]
    async fn test_publisher_forwards_in_order() {
        let (publisher, mut receiver) = EventPublisher::channel();
        let other = publisher.clone();

        assert!(publisher.publish("workspace", r#"{"change":"focus"}"#));
        assert!(other.publish("window", r#"{"change":"new"}"#));

        assert_eq!(receiver.recv().await.unwrap().name, "workspace");
        assert_eq!(receiver.recv().await.unwrap().name, "window");
    }

    #[test]
    fn test_publish_after_receiver_dropped() {
        let (publisher, receiver) = EventPublisher::channel();
        drop(receiver);
        assert!(!publisher.publish("workspace", "{}"));
    }

    #[test]
    fn test_render_request_flag() {
        let mut clients = ClientRegistry::new(1024, 1024);
        let mut ipc = IpcContext::new(&mut clients);
        assert!(!ipc.render_requested());
        ipc.request_render();
        assert!(ipc.render_requested());
    }
}
