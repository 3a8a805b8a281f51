//! tilewm daemon
//!
//! Loads the configuration, opens the IPC socket and runs the event loop
//! until SIGINT or SIGTERM.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tilewm_daemon::ipc::{inherited_listeners, resolve_socket_path, IpcListener};
use tilewm_daemon::{HeadlessWm, NullDisplay, Reactor, ReactorSettings};
use tilewm_config::ConfigError;
use tilewm_ipc::SOCKET_ENV;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(name = "tilewm")]
#[command(about = "Tiling window manager with an i3-compatible IPC socket")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/tilewm/config.kdl")]
    config: String,

    /// Create the IPC socket at this path
    #[arg(short, long)]
    socket: Option<String>,

    /// Print the IPC socket path and exit
    #[arg(long)]
    get_socketpath: bool,

    /// Check the configuration file and exit
    #[arg(long)]
    validate: bool,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Log to stderr. `RUST_LOG` wins; otherwise start at `info` until the
/// configured level is known.
fn init_tracing() -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let log_filter = init_tracing();
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    info!("Loading configuration from {}", config_path.display());
    let config = match tilewm_config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", render_config_error(e));
            bail!("Invalid configuration in {}", config_path.display());
        }
    };

    if std::env::var_os("RUST_LOG").is_none() {
        let level = config.global.log_level.as_filter();
        if let Err(e) = log_filter.reload(EnvFilter::new(level)) {
            warn!("Could not apply log level {}: {}", level, e);
        }
    }

    info!(
        "Loaded configuration with {} output(s), {} workspace(s), {} bar(s)",
        config.outputs.len(),
        config.workspaces.len(),
        config.bars.len()
    );

    let socket_path = resolve_socket_path(
        args.socket.as_deref(),
        config.global.ipc_socket_path.as_deref(),
    );

    if args.get_socketpath {
        println!("{}", socket_path.display());
        return Ok(());
    }

    if args.validate {
        println!("Configuration OK: {}", config_path.display());
        return Ok(());
    }

    let mut listeners = inherited_listeners();
    match IpcListener::bind(&socket_path) {
        Ok(listener) => {
            listeners.push(listener);
            std::env::set_var(SOCKET_ENV, &socket_path);
        }
        Err(e) => error!("Could not create IPC socket: {:#}", e),
    }

    let settings = ReactorSettings::from_config(&config.global, Some(socket_path));
    let wm = HeadlessWm::from_config(&config);
    let mut reactor = Reactor::new(wm, NullDisplay, listeners, settings);

    info!("tilewm {} starting", env!("CARGO_PKG_VERSION"));
    reactor.run_until(shutdown_signal()).await;
    info!("tilewm stopped");

    Ok(())
}

/// Full miette report for a configuration error, with the offending source
/// lines when the file failed to parse.
fn render_config_error(error: ConfigError) -> String {
    format!("{:?}", miette::Report::new(error))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_report_shows_source() {
        let error = tilewm_config::parse_config_str("global {\n    log-level \"debug\" }}\n")
            .unwrap_err();
        let report = render_config_error(error);

        assert!(report.contains("Failed to parse KDL"), "{}", report);
        assert!(report.contains("log-level"), "{}", report);
        assert!(report.contains("here"), "{}", report);
    }

    #[test]
    fn test_validate_flag() {
        let args = Args::parse_from(["tilewm", "--config", "/tmp/bad.kdl", "--validate"]);
        assert!(args.validate);
        assert_eq!(args.config, "/tmp/bad.kdl");
    }
}
