//! Request handlers
//!
//! Every request type has one handler. A handler turns the request payload
//! into a reply payload; the reactor frames the reply with the request's own
//! type code and queues it for the requesting client. Type codes outside the
//! known set are logged and dropped without a reply.

use std::os::unix::io::RawFd;

use serde::Serialize;
use serde_json::json;
use tilewm_ipc::{Message, MessageType, SuccessReply, VersionReply};
use tracing::{debug, error, info, warn};

use crate::events::IpcContext;
use crate::wm::WindowManager;

/// A reply ready to be framed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

/// Routes requests to their handler
#[derive(Debug, Clone)]
pub struct Dispatcher {
    version: VersionReply,
    /// Advertised to bars that do not name a socket of their own
    socket_path: Option<String>,
}

impl Dispatcher {
    pub fn new(socket_path: Option<String>) -> Self {
        Self {
            version: daemon_version(),
            socket_path,
        }
    }

    /// Handle one request from client `fd`.
    ///
    /// Returns `None` when no reply should be sent: unknown type codes, and
    /// the rare case where the reply could not be serialized.
    pub fn dispatch<W: WindowManager>(
        &self,
        wm: &mut W,
        ipc: &mut IpcContext<'_>,
        fd: RawFd,
        message: &Message,
    ) -> Option<Reply> {
        let kind = match MessageType::try_from(message.kind) {
            Ok(kind) => kind,
            Err(code) => {
                warn!("Unhandled IPC message type {} from fd {}", code, fd);
                return None;
            }
        };
        debug!(
            "IPC request {} from fd {} ({} bytes)",
            kind,
            fd,
            message.payload.len()
        );

        let payload = match kind {
            MessageType::RunCommand => handle_run_command(wm, ipc, &message.payload),
            MessageType::GetWorkspaces => to_json(&wm.workspaces()),
            MessageType::Subscribe => handle_subscribe(ipc, fd, &message.payload),
            MessageType::GetOutputs => to_json(&wm.outputs()),
            MessageType::GetTree => to_json(&wm.tree()),
            MessageType::GetMarks => to_json(&wm.marks()),
            MessageType::GetBarConfig => self.handle_bar_config(wm, &message.payload),
            MessageType::GetVersion => to_json(&self.version),
        };

        match payload {
            Ok(payload) => Some(Reply { kind, payload }),
            Err(e) => {
                error!("Could not serialize {} reply: {}", kind, e);
                None
            }
        }
    }

    fn handle_bar_config<W: WindowManager>(
        &self,
        wm: &W,
        payload: &[u8],
    ) -> serde_json::Result<Vec<u8>> {
        if payload.is_empty() {
            return to_json(&wm.bar_ids());
        }

        let id = String::from_utf8_lossy(payload);
        match wm.bar_config(&id) {
            Some(mut bar) => {
                if bar.socket_path.is_none() {
                    bar.socket_path = self.socket_path.clone();
                }
                to_json(&bar)
            }
            None => {
                debug!("No bar with id {:?}", id);
                to_json(&json!({ "id": null }))
            }
        }
    }
}

fn handle_run_command<W: WindowManager>(
    wm: &mut W,
    ipc: &mut IpcContext<'_>,
    payload: &[u8],
) -> serde_json::Result<Vec<u8>> {
    let command = String::from_utf8_lossy(payload);
    info!("IPC: received command: {}", command);

    let outcome = wm.run_command(&command, ipc);
    if outcome.needs_render {
        ipc.request_render();
    }
    to_json(&outcome.results)
}

/// Add the event names in a JSON array to the client's subscriptions.
///
/// A payload that is not a JSON array of strings changes nothing and is
/// answered with `{"success":false}`.
fn handle_subscribe(
    ipc: &mut IpcContext<'_>,
    fd: RawFd,
    payload: &[u8],
) -> serde_json::Result<Vec<u8>> {
    let events: Vec<String> = match serde_json::from_slice(payload) {
        Ok(events) => events,
        Err(e) => {
            warn!("Invalid subscribe payload from fd {}: {}", fd, e);
            return to_json(&SuccessReply { success: false });
        }
    };

    match ipc.clients().find_mut(fd) {
        Some(client) => {
            debug!("fd {} subscribed to {:?}", fd, events);
            client.subscribe(events);
            to_json(&SuccessReply { success: true })
        }
        None => {
            error!("Subscribe from fd {} which is not a registered client", fd);
            to_json(&SuccessReply { success: false })
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Version of this build, from the crate version.
pub fn daemon_version() -> VersionReply {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    VersionReply {
        major: part(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: part(env!("CARGO_PKG_VERSION_MINOR")),
        patch: part(env!("CARGO_PKG_VERSION_PATCH")),
        human_readable: format!("tilewm {}", env!("CARGO_PKG_VERSION")),
    }
}
