//! Configuration data model

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default inbound message bound (64 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default bound on unwritten output per IPC client (16 MiB)
pub const DEFAULT_MAX_CLIENT_BACKLOG: usize = 16 * 1024 * 1024;

/// Color keys a bar block may set
pub const BAR_COLOR_KEYS: &[&str] = &[
    "background",
    "statusline",
    "separator",
    "focused_workspace_border",
    "focused_workspace_bg",
    "focused_workspace_text",
    "active_workspace_border",
    "active_workspace_bg",
    "active_workspace_text",
    "inactive_workspace_border",
    "inactive_workspace_bg",
    "inactive_workspace_text",
    "urgent_workspace_border",
    "urgent_workspace_bg",
    "urgent_workspace_text",
];

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub outputs: Vec<OutputConfig>,
    pub workspaces: Vec<WorkspaceConfig>,
    pub bars: Vec<BarConfig>,
}

impl Config {
    pub fn bar(&self, id: &str) -> Option<&BarConfig> {
        self.bars.iter().find(|bar| bar.id == id)
    }
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Where to create the IPC socket; `None` lets the daemon pick
    pub ipc_socket_path: Option<PathBuf>,
    /// Largest request payload accepted from a client, in bytes
    pub max_message_size: usize,
    /// Largest amount of unwritten output kept for one client, in bytes
    pub max_client_backlog: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            ipc_socket_path: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_client_backlog: DEFAULT_MAX_CLIENT_BACKLOG,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// A physical output of the headless layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

/// A workspace created at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub name: String,
    /// Output to place the workspace on; first output if unset
    pub output: Option<String>,
}

/// One `bar` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarConfig {
    pub id: String,
    pub outputs: Vec<String>,
    pub tray_output: Option<String>,
    /// Socket the bar should connect to; the daemon's own socket if unset
    pub socket_path: Option<String>,
    pub mode: BarMode,
    pub hidden_state: HiddenState,
    pub modifier: Modifier,
    pub position: BarPosition,
    pub status_command: Option<String>,
    pub font: Option<String>,
    pub workspace_buttons: bool,
    pub binding_mode_indicator: bool,
    pub verbose: bool,
    /// Color key (see `BAR_COLOR_KEYS`) to color string
    pub colors: BTreeMap<String, String>,
}

impl BarConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: Vec::new(),
            tray_output: None,
            socket_path: None,
            mode: BarMode::default(),
            hidden_state: HiddenState::default(),
            modifier: Modifier::default(),
            position: BarPosition::default(),
            status_command: None,
            font: None,
            workspace_buttons: true,
            binding_mode_indicator: true,
            verbose: false,
            colors: BTreeMap::new(),
        }
    }
}

/// Generates `FromStr` and `as_str` for a keyword enum.
macro_rules! keyword_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(format!("Unknown {}: {}", stringify!($name), s))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BarMode {
    #[default]
    Dock,
    Hide,
    Invisible,
}

keyword_enum!(BarMode {
    Dock => "dock",
    Hide => "hide",
    Invisible => "invisible",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HiddenState {
    #[default]
    Hide,
    Show,
}

keyword_enum!(HiddenState {
    Hide => "hide",
    Show => "show",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Modifier {
    Control,
    Shift,
    Mod1,
    Mod2,
    Mod3,
    #[default]
    Mod4,
    Mod5,
}

keyword_enum!(Modifier {
    Control => "ctrl",
    Shift => "shift",
    Mod1 => "Mod1",
    Mod2 => "Mod2",
    Mod3 => "Mod3",
    Mod4 => "Mod4",
    Mod5 => "Mod5",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BarPosition {
    Top,
    #[default]
    Bottom,
}

keyword_enum!(BarPosition {
    Top => "top",
    Bottom => "bottom",
});
