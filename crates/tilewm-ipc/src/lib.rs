//! Wire protocol for the tilewm IPC socket
//!
//! This crate is shared by the daemon and by command-line clients. It holds
//! everything both ends must agree on:
//!
//! - `codec`: the `"i3-ipc"` framing, as a `tokio_util` codec
//! - `types`: request and event type codes, reply payload structs
//! - `client`: a small blocking connection used by `tilewm-msg`
//!
//! ## Protocol
//!
//! Requests and replies share one framing. A reply always carries the type
//! code of the request it answers. Events pushed after a `SUBSCRIBE` use the
//! same framing with the high bit of the type code set, so a client tells
//! replies and events apart by type code alone.

mod client;
mod codec;
mod error;
mod types;

pub use client::{default_socket_path, socket_path_from_env, Connection, SOCKET_ENV};
pub use codec::{IpcCodec, Message, DEFAULT_MAX_PAYLOAD, HEADER_LEN, MAGIC};
pub use error::ProtocolError;
pub use types::{
    event_code, is_event, BarConfigReply, CommandReply, EventType, MessageType, OutputReply,
    Rect, SuccessReply, VersionReply, WorkspaceReply, EVENT_MASK, GENERIC_EVENT_CODE,
};
