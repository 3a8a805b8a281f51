//! Type codes and reply payloads
//!
//! Request codes 0..=7 are fixed by the protocol. A reply carries the code of
//! the request it answers. Events set the high bit (`EVENT_MASK`) and use the
//! low bits to say which event it is.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Request Types
// ============================================================================

/// The closed set of requests a client can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Run a command; payload is plain command text
    RunCommand = 0,
    /// List workspaces
    GetWorkspaces = 1,
    /// Subscribe to events; payload is a JSON array of event names
    Subscribe = 2,
    /// List outputs
    GetOutputs = 3,
    /// Dump the layout tree
    GetTree = 4,
    /// List all marks
    GetMarks = 5,
    /// List bar ids, or get the config of one bar
    GetBarConfig = 6,
    /// Get the daemon version
    GetVersion = 7,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::RunCommand,
        MessageType::GetWorkspaces,
        MessageType::Subscribe,
        MessageType::GetOutputs,
        MessageType::GetTree,
        MessageType::GetMarks,
        MessageType::GetBarConfig,
        MessageType::GetVersion,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Name used on the command line (`tilewm-msg -t <name>`)
    pub fn name(self) -> &'static str {
        match self {
            MessageType::RunCommand => "command",
            MessageType::GetWorkspaces => "get_workspaces",
            MessageType::Subscribe => "subscribe",
            MessageType::GetOutputs => "get_outputs",
            MessageType::GetTree => "get_tree",
            MessageType::GetMarks => "get_marks",
            MessageType::GetBarConfig => "get_bar_config",
            MessageType::GetVersion => "get_version",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, u32> {
        MessageType::ALL
            .get(code as usize)
            .copied()
            .ok_or(code)
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower == "run_command" {
            return Ok(MessageType::RunCommand);
        }
        MessageType::ALL
            .into_iter()
            .find(|t| t.name() == lower)
            .ok_or_else(|| format!("Unknown message type: {}", s))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// High bit set on every event type code
pub const EVENT_MASK: u32 = 1 << 31;

/// Code used for event names the protocol has no number for
pub const GENERIC_EVENT_CODE: u32 = EVENT_MASK | 0x7fff_ffff;

/// Events with a well-known type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Workspace,
    Output,
    Mode,
    Window,
    BarconfigUpdate,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Workspace,
        EventType::Output,
        EventType::Mode,
        EventType::Window,
        EventType::BarconfigUpdate,
    ];

    pub fn code(self) -> u32 {
        let index = match self {
            EventType::Workspace => 0,
            EventType::Output => 1,
            EventType::Mode => 2,
            EventType::Window => 3,
            EventType::BarconfigUpdate => 4,
        };
        EVENT_MASK | index
    }

    /// Name clients pass to `SUBSCRIBE`
    pub fn name(self) -> &'static str {
        match self {
            EventType::Workspace => "workspace",
            EventType::Output => "output",
            EventType::Mode => "mode",
            EventType::Window => "window",
            EventType::BarconfigUpdate => "barconfig_update",
        }
    }

    /// Case-insensitive lookup by subscription name
    pub fn from_name(name: &str) -> Option<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn from_code(code: u32) -> Option<Self> {
        EventType::ALL.into_iter().find(|t| t.code() == code)
    }
}

/// Type code for an event name, falling back to `GENERIC_EVENT_CODE`.
pub fn event_code(name: &str) -> u32 {
    EventType::from_name(name)
        .map(EventType::code)
        .unwrap_or(GENERIC_EVENT_CODE)
}

/// Whether a type code belongs to an event rather than a reply.
pub fn is_event(code: u32) -> bool {
    code & EVENT_MASK != 0
}

// ============================================================================
// Reply Payloads
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One entry of the `GET_WORKSPACES` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceReply {
    /// Workspace number, `null` for workspaces whose name is not numeric
    pub num: Option<i32>,
    pub name: String,
    pub visible: bool,
    pub focused: bool,
    pub rect: Rect,
    pub output: String,
    pub urgent: bool,
}

/// One entry of the `GET_OUTPUTS` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputReply {
    pub name: String,
    pub active: bool,
    pub primary: bool,
    pub rect: Rect,
    /// Workspace currently shown on this output, if any
    pub current_workspace: Option<String>,
}

/// `GET_VERSION` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub human_readable: String,
}

/// `SUBSCRIBE` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessReply {
    pub success: bool,
}

/// Result of one sub-command in a `RUN_COMMAND` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// `GET_BAR_CONFIG` reply for a known bar id
///
/// Optional string fields are omitted when unset rather than sent as `null`.
/// An unknown id is answered with `{"id": null}` instead of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarConfigReply {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tray_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
    /// `dock`, `hide` or `invisible`
    pub mode: String,
    /// `hide` or `show`
    pub hidden_state: String,
    /// `ctrl`, `shift` or `Mod1`..`Mod5`
    pub modifier: String,
    /// `top` or `bottom`
    pub position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    pub workspace_buttons: bool,
    pub binding_mode_indicator: bool,
    pub verbose: bool,
    pub colors: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes_are_sequential() {
        for (index, kind) in MessageType::ALL.iter().enumerate() {
            assert_eq!(kind.code(), index as u32);
            assert_eq!(MessageType::try_from(index as u32), Ok(*kind));
        }
        assert_eq!(MessageType::try_from(8), Err(8));
        assert_eq!(MessageType::try_from(99), Err(99));
    }

    #[test]
    fn test_message_type_from_str() {
        assert_eq!("command".parse::<MessageType>(), Ok(MessageType::RunCommand));
        assert_eq!("run_command".parse::<MessageType>(), Ok(MessageType::RunCommand));
        assert_eq!("GET_TREE".parse::<MessageType>(), Ok(MessageType::GetTree));
        assert!("get_everything".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_event_codes() {
        assert_eq!(EventType::Workspace.code(), 0x8000_0000);
        assert_eq!(EventType::Output.code(), 0x8000_0001);
        assert_eq!(EventType::BarconfigUpdate.code(), 0x8000_0004);
        assert_eq!(event_code("WORKSPACE"), EventType::Workspace.code());
        assert_eq!(event_code("something_new"), GENERIC_EVENT_CODE);
        assert_eq!(
            EventType::from_code(0x8000_0002),
            Some(EventType::Mode)
        );
        assert!(is_event(GENERIC_EVENT_CODE));
        assert!(!is_event(MessageType::GetVersion.code()));
    }

    #[test]
    fn test_workspace_reply_serialization() {
        let ws = WorkspaceReply {
            num: None,
            name: "web".to_string(),
            visible: true,
            focused: false,
            rect: Rect::new(0, 0, 1920, 1080),
            output: "eDP-1".to_string(),
            urgent: false,
        };
        let json = serde_json::to_string(&ws).unwrap();
        assert!(json.contains(r#""num":null"#));
        assert!(json.contains(r#""rect":{"x":0,"y":0,"width":1920,"height":1080}"#));
    }

    #[test]
    fn test_command_reply_omits_missing_error() {
        assert_eq!(
            serde_json::to_string(&CommandReply::ok()).unwrap(),
            r#"{"success":true}"#
        );
        assert_eq!(
            serde_json::to_string(&CommandReply::failed("Unknown command")).unwrap(),
            r#"{"success":false,"error":"Unknown command"}"#
        );
    }

    #[test]
    fn test_bar_config_reply_skips_unset_fields() {
        let reply = BarConfigReply {
            id: "bar-0".to_string(),
            outputs: Vec::new(),
            tray_output: None,
            socket_path: None,
            mode: "dock".to_string(),
            hidden_state: "hide".to_string(),
            modifier: "Mod4".to_string(),
            position: "bottom".to_string(),
            status_command: None,
            font: None,
            workspace_buttons: true,
            binding_mode_indicator: true,
            verbose: false,
            colors: Default::default(),
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(!json.contains("outputs"));
        assert!(!json.contains("tray_output"));
        assert!(!json.contains("null"));
        assert!(json.contains(r#""colors":{}"#));
    }
}
