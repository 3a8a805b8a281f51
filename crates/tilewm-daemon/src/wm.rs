//! Seams between the IPC reactor and the rest of the window manager
//!
//! The reactor owns no layout state. It asks a `WindowManager` for replies
//! and drives a `DisplayConnection` for window-system traffic. Both get an
//! `IpcContext` while they run so they can publish events to subscribers and
//! ask for a render.

use std::os::unix::io::RawFd;

use tilewm_ipc::{BarConfigReply, CommandReply, OutputReply, WorkspaceReply};

use crate::events::IpcContext;

/// What running a command string produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// One entry per sub-command, in the order they ran
    pub results: Vec<CommandReply>,
    /// Whether the layout changed and must be rendered before replying
    pub needs_render: bool,
}

/// Layout state and command interpreter
pub trait WindowManager {
    /// Run a command string. Events may be published through `ipc`.
    fn run_command(&mut self, command: &str, ipc: &mut IpcContext<'_>) -> CommandOutcome;

    /// The whole layout tree, as sent for `GET_TREE`
    fn tree(&self) -> serde_json::Value;

    fn workspaces(&self) -> Vec<WorkspaceReply>;

    fn outputs(&self) -> Vec<OutputReply>;

    fn marks(&self) -> Vec<String>;

    /// Ids of all configured bars, in configuration order
    fn bar_ids(&self) -> Vec<String>;

    fn bar_config(&self, id: &str) -> Option<BarConfigReply>;

    /// Push the current layout to the screen.
    fn render(&mut self);
}

/// Connection to the window system (an X server, or nothing at all)
///
/// The reactor watches `display_fd` and `keyboard_fd` for readability and
/// calls both drain methods after every wake. Drain methods must consume
/// everything already queued, since readiness is edge-triggered.
pub trait DisplayConnection<W> {
    fn display_fd(&self) -> Option<RawFd>;

    fn keyboard_fd(&self) -> Option<RawFd> {
        None
    }

    /// Send buffered requests to the window system. Called before every wait.
    fn flush(&mut self);

    /// Handle every display event queued so far.
    fn drain_events(&mut self, wm: &mut W, ipc: &mut IpcContext<'_>);

    /// Handle every keyboard event queued so far.
    fn drain_keyboard_events(&mut self, _wm: &mut W, _ipc: &mut IpcContext<'_>) {}
}

/// Display connection for running without a window system
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl<W> DisplayConnection<W> for NullDisplay {
    fn display_fd(&self) -> Option<RawFd> {
        None
    }

    fn flush(&mut self) {}

    fn drain_events(&mut self, _wm: &mut W, _ipc: &mut IpcContext<'_>) {}
}
