//! Configuration parsing for tilewm
//!
//! This crate handles parsing the KDL settings file read by the daemon at
//! startup: IPC socket settings, the outputs and workspaces of the headless
//! layout, and the bar definitions served over `GET_BAR_CONFIG`.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};
