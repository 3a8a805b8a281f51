//! Listening endpoints for the IPC socket
//!
//! Endpoints come from two places:
//!
//! - Sockets handed over by the service manager (`LISTEN_PID` and
//!   `LISTEN_FDS`, descriptors starting at 3). These are used as they are and
//!   never unlinked.
//! - A socket the daemon binds itself at the configured path. A stale file at
//!   that path is removed first, and the socket file is removed again when
//!   the endpoint is dropped.
//!
//! Failing to set up an endpoint only disables that endpoint.

use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// First descriptor passed by socket activation
pub const LISTEN_FDS_START: RawFd = 3;

// ============================================================================
// Socket Path
// ============================================================================

/// Pick the socket path: `--socket`, then the settings file, then the
/// per-user default. A leading `~` is expanded.
pub fn resolve_socket_path(flag: Option<&str>, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return expand(path);
    }
    if let Some(path) = configured {
        return expand(&path.to_string_lossy());
    }
    tilewm_ipc::default_socket_path()
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// Listener
// ============================================================================

#[derive(Debug)]
enum Origin {
    /// Bound by us; unlinked on drop
    Bound(PathBuf),
    /// Passed in by the service manager
    Inherited,
}

/// One listening socket
#[derive(Debug)]
pub struct IpcListener {
    listener: UnixListener,
    origin: Origin,
}

impl IpcListener {
    /// Bind a new socket at `path`.
    ///
    /// This will:
    /// 1. Create missing parent directories
    /// 2. Remove any file already at `path` (stale from a previous run)
    /// 3. Create and bind the `UnixListener`
    pub fn bind(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory {}", parent.display())
            })?;
        }

        // symlink_metadata so a dangling entry still counts as present
        if path.symlink_metadata().is_ok() {
            debug!("Removing stale socket file: {}", path.display());
            std::fs::remove_file(path).with_context(|| {
                format!("Failed to remove stale socket file: {}", path.display())
            })?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to create IPC socket at {}", path.display()))?;

        info!("IPC listening on {}", path.display());

        Ok(Self {
            listener,
            origin: Origin::Bound(path.to_path_buf()),
        })
    }

    /// Adopt a listening socket passed in by the service manager.
    ///
    /// The caller must own `fd`, and it must be a listening Unix socket.
    pub fn from_inherited(fd: RawFd) -> Result<Self> {
        // Inherited sockets must survive an exec of the daemon.
        let flags = fcntl(fd, FcntlArg::F_GETFD)
            .with_context(|| format!("Could not read descriptor flags of fd {}", fd))?;
        let mut flags = FdFlag::from_bits_truncate(flags);
        flags.remove(FdFlag::FD_CLOEXEC);
        fcntl(fd, FcntlArg::F_SETFD(flags))
            .with_context(|| format!("Could not disable FD_CLOEXEC on fd {}", fd))?;

        // SAFETY: the service manager passed `fd` to this process and nothing
        // else in the process has taken ownership of it.
        let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
        std_listener
            .set_nonblocking(true)
            .with_context(|| format!("Could not make fd {} non-blocking", fd))?;
        let listener = UnixListener::from_std(std_listener)
            .with_context(|| format!("Could not watch inherited socket fd {}", fd))?;

        info!("IPC listening on inherited socket (fd {})", fd);

        Ok(Self {
            listener,
            origin: Origin::Inherited,
        })
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Path of a socket we bound; `None` for inherited sockets.
    pub fn socket_path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Bound(path) => Some(path),
            Origin::Inherited => None,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        let Origin::Bound(path) = &self.origin else {
            return;
        };

        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove IPC socket file on shutdown: {}", e);
            }
        } else {
            debug!("Removed IPC socket file: {}", path.display());
        }
    }
}

// ============================================================================
// Socket Activation
// ============================================================================

/// Number of descriptors passed by socket activation.
///
/// `listen_pid` and `listen_fds` are the raw values of `LISTEN_PID` and
/// `LISTEN_FDS`. Zero means "not socket-activated", including when the
/// variables were meant for another process.
pub fn parse_listen_fds(
    listen_pid: Option<&str>,
    listen_fds: Option<&str>,
    our_pid: u32,
) -> Result<usize> {
    let (Some(pid), Some(count)) = (listen_pid, listen_fds) else {
        return Ok(0);
    };

    let pid: u32 = pid
        .trim()
        .parse()
        .with_context(|| format!("Invalid LISTEN_PID: {:?}", pid))?;
    if pid != our_pid {
        debug!("LISTEN_PID {} is not ours ({}), ignoring", pid, our_pid);
        return Ok(0);
    }

    let count: usize = count
        .trim()
        .parse()
        .with_context(|| format!("Invalid LISTEN_FDS: {:?}", count))?;
    if count > (RawFd::MAX - LISTEN_FDS_START) as usize {
        bail!("LISTEN_FDS out of range: {}", count);
    }
    Ok(count)
}

/// Take over the sockets passed by the service manager, if any.
///
/// The activation variables are removed from the environment so children do
/// not see them. Errors are logged and leave the inherited set empty.
pub fn inherited_listeners() -> Vec<IpcListener> {
    let pid = std::env::var("LISTEN_PID").ok();
    let fds = std::env::var("LISTEN_FDS").ok();
    std::env::remove_var("LISTEN_PID");
    std::env::remove_var("LISTEN_FDS");
    std::env::remove_var("LISTEN_FDNAMES");

    let count = match parse_listen_fds(pid.as_deref(), fds.as_deref(), std::process::id()) {
        Ok(count) => count,
        Err(e) => {
            error!("socket activation: {:#}", e);
            return Vec::new();
        }
    };
    if count == 0 {
        return Vec::new();
    }

    info!("socket activation: {} inherited descriptor(s)", count);
    (0..count)
        .filter_map(|offset| {
            let fd = LISTEN_FDS_START + offset as RawFd;
            IpcListener::from_inherited(fd)
                .map_err(|e| error!("socket activation: {:#}", e))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::IntoRawFd;
    use tempfile::TempDir;

    // ========================================================================
    // Bound Sockets
    // ========================================================================

    #[tokio::test]
    async fn test_bind_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("ipc.sock");

        let listener = IpcListener::bind(&socket_path).unwrap();
        assert_eq!(listener.socket_path(), Some(socket_path.as_path()));
        assert!(socket_path.exists());

        drop(listener);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_bind_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("run").join("tilewm").join("ipc.sock");

        let _listener = IpcListener::bind(&socket_path).unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_bind_removes_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("ipc.sock");

        std::fs::write(&socket_path, "stale").unwrap();

        let listener = IpcListener::bind(&socket_path).unwrap();
        let _client = UnixStream::connect(&socket_path).await.unwrap();
        let _server_side = listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_in_unwritable_location() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        // Parent "directory" is a regular file
        assert!(IpcListener::bind(&blocker.join("ipc.sock")).is_err());
    }

    // ========================================================================
    // Inherited Sockets
    // ========================================================================

    #[tokio::test]
    async fn test_inherited_socket_is_not_unlinked() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("activated.sock");
        let fd = std::os::unix::net::UnixListener::bind(&socket_path)
            .unwrap()
            .into_raw_fd();

        let listener = IpcListener::from_inherited(fd).unwrap();
        assert!(listener.socket_path().is_none());

        let _client = UnixStream::connect(&socket_path).await.unwrap();
        let _server_side = listener.accept().await.unwrap();

        drop(listener);
        assert!(socket_path.exists());
    }

    #[test]
    fn test_listen_fds_for_us() {
        assert_eq!(parse_listen_fds(Some("42"), Some("2"), 42).unwrap(), 2);
    }

    #[test]
    fn test_listen_fds_for_another_process() {
        assert_eq!(parse_listen_fds(Some("41"), Some("2"), 42).unwrap(), 0);
    }

    #[test]
    fn test_listen_fds_unset() {
        assert_eq!(parse_listen_fds(None, None, 42).unwrap(), 0);
        assert_eq!(parse_listen_fds(Some("42"), None, 42).unwrap(), 0);
    }

    #[test]
    fn test_listen_fds_garbage() {
        assert!(parse_listen_fds(Some("abc"), Some("1"), 42).is_err());
        assert!(parse_listen_fds(Some("42"), Some("-1"), 42).is_err());
    }

    // ========================================================================
    // Socket Path
    // ========================================================================

    #[test]
    fn test_resolve_prefers_flag() {
        let path = resolve_socket_path(Some("/tmp/a.sock"), Some(Path::new("/tmp/b.sock")));
        assert_eq!(path, PathBuf::from("/tmp/a.sock"));
    }

    #[test]
    fn test_resolve_uses_config_then_default() {
        let path = resolve_socket_path(None, Some(Path::new("/tmp/b.sock")));
        assert_eq!(path, PathBuf::from("/tmp/b.sock"));

        let path = resolve_socket_path(None, None);
        assert_eq!(path, tilewm_ipc::default_socket_path());
    }

    #[test]
    fn test_resolve_expands_tilde() {
        let path = resolve_socket_path(Some("~/tilewm.sock"), None);
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("tilewm.sock"));
    }
}
