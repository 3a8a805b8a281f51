//! KDL configuration parser

use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse the configuration file, or fall back to defaults if it does not exist
///
/// A missing file is not an error: the daemon is usable with defaults. Any
/// other failure (unreadable file, bad KDL, invalid values) is returned.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match parse_config(path) {
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            Ok(Config::default())
        }
        other => other,
    }
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so we need to extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "output" => {
                config.outputs.push(parse_output(node)?);
            }
            "workspace" => {
                config.workspaces.push(parse_workspace(node)?);
            }
            "bar" => {
                let index = config.bars.len();
                config.bars.push(parse_bar(node, index)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    validate(&config)?;

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "ipc-socket-path" => {
                    if let Some(val) = first_string(child) {
                        global.ipc_socket_path = Some(shellexpand::tilde(val).into_owned().into());
                    }
                }
                "max-message-size" => {
                    global.max_message_size = positive_size(child)?;
                }
                "max-client-backlog" => {
                    global.max_client_backlog = positive_size(child)?;
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_output(node: &kdl::KdlNode) -> Result<OutputConfig, ConfigError> {
    let name = first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: "output name".to_string(),
    })?;

    let mut output = OutputConfig {
        name: name.to_string(),
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
        primary: false,
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "rect" => {
                    let values: Vec<i64> = child
                        .entries()
                        .iter()
                        .filter(|e| e.name().is_none())
                        .filter_map(|e| e.value().as_i64())
                        .collect();
                    let &[x, y, width, height] = values.as_slice() else {
                        return Err(ConfigError::Invalid {
                            message: format!(
                                "output '{}': rect needs four integers (x y width height)",
                                output.name
                            ),
                        });
                    };
                    output.x = to_coordinate(x, &output.name)?;
                    output.y = to_coordinate(y, &output.name)?;
                    output.width = to_extent(width, &output.name)?;
                    output.height = to_extent(height, &output.name)?;
                }
                "primary" => {
                    output.primary = flag(child);
                }
                name => {
                    tracing::warn!("Unknown output option: {}", name);
                }
            }
        }
    }

    Ok(output)
}

fn parse_workspace(node: &kdl::KdlNode) -> Result<WorkspaceConfig, ConfigError> {
    let name = first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: "workspace name".to_string(),
    })?;

    let mut workspace = WorkspaceConfig {
        name: name.to_string(),
        output: None,
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "output" => {
                    workspace.output = first_string(child).map(|s| s.to_string());
                }
                name => {
                    tracing::warn!("Unknown workspace option: {}", name);
                }
            }
        }
    }

    Ok(workspace)
}

fn parse_bar(node: &kdl::KdlNode, index: usize) -> Result<BarConfig, ConfigError> {
    let id = first_string(node)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("bar-{}", index));

    let mut bar = BarConfig::new(id);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "output" => {
                    bar.outputs.extend(strings(child));
                }
                "tray-output" => {
                    bar.tray_output = first_string(child).map(|s| s.to_string());
                }
                "socket-path" => {
                    bar.socket_path = first_string(child).map(|s| s.to_string());
                }
                "mode" => {
                    bar.mode = keyword(child, &bar.id)?;
                }
                "hidden-state" => {
                    bar.hidden_state = keyword(child, &bar.id)?;
                }
                "modifier" => {
                    bar.modifier = keyword(child, &bar.id)?;
                }
                "position" => {
                    bar.position = keyword(child, &bar.id)?;
                }
                "status-command" => {
                    bar.status_command = first_string(child).map(|s| s.to_string());
                }
                "font" => {
                    bar.font = first_string(child).map(|s| s.to_string());
                }
                "workspace-buttons" => {
                    bar.workspace_buttons = flag(child);
                }
                "binding-mode-indicator" => {
                    bar.binding_mode_indicator = flag(child);
                }
                "verbose" => {
                    bar.verbose = flag(child);
                }
                "colors" => {
                    parse_colors(child, &mut bar);
                }
                name => {
                    tracing::warn!("Unknown bar option: {}", name);
                }
            }
        }
    }

    Ok(bar)
}

fn parse_colors(node: &kdl::KdlNode, bar: &mut BarConfig) {
    let Some(children) = node.children() else {
        return;
    };

    for child in children.nodes() {
        let key = child.name().value().replace('-', "_");
        if !BAR_COLOR_KEYS.contains(&key.as_str()) {
            tracing::warn!("Unknown bar color '{}' in bar '{}'", key, bar.id);
            continue;
        }
        if let Some(color) = first_string(child) {
            bar.colors.insert(key, color.to_string());
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for bar in &config.bars {
        if !seen.insert(bar.id.as_str()) {
            return Err(ConfigError::Invalid {
                message: format!("Duplicate bar id: {}", bar.id),
            });
        }
    }

    let outputs: HashSet<&str> = config.outputs.iter().map(|o| o.name.as_str()).collect();
    for workspace in &config.workspaces {
        if let Some(output) = &workspace.output {
            if !outputs.contains(output.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "Workspace '{}' is assigned to unknown output '{}'",
                        workspace.name, output
                    ),
                });
            }
        }
    }

    Ok(())
}

// ============================================================================
// Entry helpers
// ============================================================================

/// First positional string argument of a node
fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// All positional string arguments of a node
fn strings(node: &kdl::KdlNode) -> impl Iterator<Item = String> + '_ {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// A bare node (`primary`) means true; otherwise its first boolean argument.
fn flag(node: &kdl::KdlNode) -> bool {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
        .unwrap_or(true)
}

fn keyword<T>(node: &kdl::KdlNode, bar_id: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    let value = first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: format!("bar '{}': {}", bar_id, node.name().value()),
    })?;
    value.parse().map_err(|e| ConfigError::Invalid {
        message: format!("bar '{}': {}", bar_id, e),
    })
}

fn positive_size(node: &kdl::KdlNode) -> Result<usize, ConfigError> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_i64())
        .ok_or_else(|| ConfigError::MissingField {
            field: node.name().value().to_string(),
        })?;

    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("{} must be a positive integer, got {}", node.name().value(), value),
        })
}

fn to_coordinate(value: i64, output: &str) -> Result<i32, ConfigError> {
    i32::try_from(value).map_err(|_| ConfigError::Invalid {
        message: format!("output '{}': coordinate {} out of range", output, value),
    })
}

fn to_extent(value: i64, output: &str) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("output '{}': size {} must be positive", output, value),
        })
}
