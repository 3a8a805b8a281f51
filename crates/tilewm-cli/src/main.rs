//! tilewm-msg
//!
//! Send one message to a running tilewm and print the reply.
//!
//! ```text
//! tilewm-msg workspace 3
//! tilewm-msg -t get_workspaces
//! tilewm-msg -t subscribe -m '["workspace","mode"]'
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};
use tilewm_ipc::{CommandReply, Connection, EventType, MessageType};

#[derive(Parser, Debug)]
#[command(name = "tilewm-msg")]
#[command(about = "Send messages to the tilewm IPC socket")]
#[command(version)]
struct Cli {
    /// IPC socket path (default: $TILEWM_SOCK, then the per-user socket)
    #[arg(short, long)]
    socket: Option<String>,

    /// Message type: command, get_workspaces, subscribe, get_outputs,
    /// get_tree, get_marks, get_bar_config or get_version
    #[arg(short = 't', long = "type", default_value = "command")]
    kind: String,

    /// After a subscribe, keep printing events as they arrive
    #[arg(short, long)]
    monitor: bool,

    /// Print nothing; report failure through the exit status only
    #[arg(short, long)]
    quiet: bool,

    /// Message payload; words are joined with spaces
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    message: Vec<String>,
}

fn main() -> miette::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let kind: MessageType = cli.kind.parse().map_err(|e: String| miette::miette!("{}", e))?;
    let payload = cli.message.join(" ");
    let socket_path = socket_path(cli.socket.as_deref());

    tracing::debug!("Connecting to {}", socket_path.display());
    let mut conn = Connection::connect(&socket_path).into_diagnostic()?;

    let text = if kind == MessageType::Subscribe {
        let events: Vec<String> = serde_json::from_str(&payload)
            .into_diagnostic()
            .wrap_err("subscribe expects a JSON array of event names")?;
        let events: Vec<&str> = events.iter().map(String::as_str).collect();
        let success = conn.subscribe(&events).into_diagnostic()?;
        serde_json::json!({ "success": success }).to_string()
    } else {
        let reply = conn.request(kind, payload.as_bytes()).into_diagnostic()?;
        reply.payload_str().into_diagnostic()?.to_string()
    };

    let status = print_reply(
        &mut std::io::stdout(),
        &mut std::io::stderr(),
        kind,
        &text,
        cli.quiet,
    )
    .into_diagnostic()?;

    if kind == MessageType::Subscribe && cli.monitor {
        loop {
            let event = conn.next_event().into_diagnostic()?;
            let name = EventType::from_code(event.kind).map_or("unknown", EventType::name);
            tracing::debug!("Received {} event", name);
            if !cli.quiet {
                println!("{}", event.payload_str().into_diagnostic()?);
            }
        }
    }

    Ok(status)
}

/// Print a reply and pick the exit status. Failed commands are listed on
/// `err` and exit with status 2; with `quiet` nothing is printed at all.
fn print_reply(
    out: &mut impl Write,
    err: &mut impl Write,
    kind: MessageType,
    text: &str,
    quiet: bool,
) -> std::io::Result<ExitCode> {
    if !quiet {
        writeln!(out, "{}", text)?;
    }

    if kind != MessageType::RunCommand {
        return Ok(ExitCode::SUCCESS);
    }

    let failures = command_failures(text);
    if failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    if !quiet {
        for error in &failures {
            writeln!(err, "ERROR: {}", error)?;
        }
    }
    Ok(ExitCode::from(2))
}

/// `--socket`, then `$TILEWM_SOCK`, then the per-user default.
fn socket_path(flag: Option<&str>) -> PathBuf {
    flag.map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
        .or_else(tilewm_ipc::socket_path_from_env)
        .unwrap_or_else(tilewm_ipc::default_socket_path)
}

/// Error messages of the sub-commands that failed.
fn command_failures(reply: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<CommandReply>>(reply) {
        Ok(results) => results
            .into_iter()
            .filter(|r| !r.success)
            .map(|r| r.error.unwrap_or_else(|| "command failed".to_string()))
            .collect(),
        Err(e) => {
            tracing::warn!("Could not parse command reply: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_words_are_joined() {
        let cli = Cli::parse_from(["tilewm-msg", "workspace", "2:", "mail"]);
        assert_eq!(cli.kind, "command");
        assert_eq!(cli.message.join(" "), "workspace 2: mail");
    }

    #[test]
    fn test_type_and_monitor_flags() {
        let cli = Cli::parse_from(["tilewm-msg", "-t", "subscribe", "-m", r#"["window"]"#]);
        assert_eq!(cli.kind.parse::<MessageType>(), Ok(MessageType::Subscribe));
        assert!(cli.monitor);
        assert_eq!(cli.message, vec![r#"["window"]"#]);
    }

    #[test]
    fn test_socket_flag_wins() {
        assert_eq!(
            socket_path(Some("/tmp/tilewm.sock")),
            PathBuf::from("/tmp/tilewm.sock")
        );
    }

    #[test]
    fn test_command_failures() {
        let reply = r#"[{"success":true},{"success":false,"error":"Unknown command: frob"}]"#;
        assert_eq!(command_failures(reply), vec!["Unknown command: frob"]);
        assert!(command_failures(r#"[{"success":true}]"#).is_empty());
        assert!(command_failures("not json").is_empty());
    }

    #[test]
    fn test_failed_command_prints_errors() {
        let reply = r#"[{"success":false,"error":"Unknown command: frob"}]"#;
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let status = print_reply(&mut out, &mut err, MessageType::RunCommand, reply, false).unwrap();

        assert_eq!(status, ExitCode::from(2));
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", reply));
        assert_eq!(String::from_utf8(err).unwrap(), "ERROR: Unknown command: frob\n");
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let reply = r#"[{"success":false,"error":"Unknown command: frob"}]"#;
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let status = print_reply(&mut out, &mut err, MessageType::RunCommand, reply, true).unwrap();

        assert_eq!(status, ExitCode::from(2));
        assert!(out.is_empty());
        assert!(err.is_empty());

        let status =
            print_reply(&mut out, &mut err, MessageType::GetMarks, "[]", true).unwrap();
        assert_eq!(status, ExitCode::SUCCESS);
        assert!(out.is_empty());
    }

    #[test]
    fn test_subscribe_against_fake_daemon() {
        use std::os::unix::net::UnixListener;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut peer = Connection::from_stream(stream.try_clone().unwrap());
            let request = peer.receive().unwrap();
            let mut frame = Vec::new();
            for (kind, payload) in [
                (MessageType::Subscribe.code(), &br#"{"success":true}"#[..]),
                (EventType::Mode.code(), &br#"{"change":"resize"}"#[..]),
            ] {
                frame.extend_from_slice(tilewm_ipc::MAGIC);
                frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                frame.extend_from_slice(&kind.to_le_bytes());
                frame.extend_from_slice(payload);
            }
            stream.write_all(&frame).unwrap();
            request
        });

        let mut conn = Connection::connect(&path).unwrap();
        assert!(conn.subscribe(&["mode"]).unwrap());
        let event = conn.next_event().unwrap();
        assert_eq!(EventType::from_code(event.kind), Some(EventType::Mode));

        let request = server.join().unwrap();
        assert_eq!(request.kind, MessageType::Subscribe.code());
        assert_eq!(&request.payload[..], br#"["mode"]"#);
    }

    #[test]
    fn test_request_against_fake_daemon() {
        use std::os::unix::net::UnixListener;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut peer = Connection::from_stream(stream.try_clone().unwrap());
            let request = peer.receive().unwrap();
            let mut frame = Vec::new();
            frame.extend_from_slice(tilewm_ipc::MAGIC);
            frame.extend_from_slice(&2u32.to_le_bytes());
            frame.extend_from_slice(&request.kind.to_le_bytes());
            frame.extend_from_slice(b"[]");
            stream.write_all(&frame).unwrap();
            request
        });

        let mut conn = Connection::connect(&path).unwrap();
        let reply = conn.request(MessageType::GetMarks, b"").unwrap();
        assert_eq!(reply.payload_str().unwrap(), "[]");

        let request = server.join().unwrap();
        assert_eq!(request.kind, MessageType::GetMarks.code());
    }
}
