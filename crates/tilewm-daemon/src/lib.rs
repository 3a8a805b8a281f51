//! tilewm daemon
//!
//! The IPC side of the window manager: listening sockets, connected clients,
//! request dispatch and event delivery, all driven by a single-threaded
//! `Reactor`. Layout state sits behind the `WindowManager` trait; the
//! window-system connection sits behind `DisplayConnection`.

pub mod client;
pub mod events;
pub mod handlers;
pub mod headless;
pub mod ipc;
pub mod reactor;
pub mod wm;

pub use events::{EventPublisher, IpcContext, PublishedEvent};
pub use headless::HeadlessWm;
pub use reactor::{Reactor, ReactorSettings};
pub use wm::{CommandOutcome, DisplayConnection, NullDisplay, WindowManager};
