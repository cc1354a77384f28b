//! Client side of the daemon IPC.
//!
//! Short-lived by design: each CLI invocation opens one socket connection,
//! exchanges one request/response pair, and disconnects. Liveness checks
//! go through the recorded PID, not just file existence, so unclean prior
//! shutdowns self-heal.

use std::path::Path;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::config;
use crate::daemon::protocol::{DaemonRequest, DaemonResponse, read_json_line, write_json_line};
use crate::error::{KapcomError, Result};

pub struct DaemonClient;

impl DaemonClient {
    /// Whether a daemon is running, judged by the recorded PID being alive
    /// and the socket path existing. Stale socket/PID files found along
    /// the way are deleted.
    pub fn is_running() -> bool {
        let (Ok(socket_path), Ok(pid_path)) =
            (config::daemon_socket_path(), config::daemon_pid_path())
        else {
            return false;
        };

        let recorded_pid = std::fs::read_to_string(&pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());

        match recorded_pid {
            None => {
                // No PID on record: any leftover socket is stale.
                if socket_path.exists() {
                    let _ = std::fs::remove_file(&socket_path);
                }
                false
            }
            Some(pid) if pid_alive(pid) => socket_path.exists(),
            Some(_) => {
                let _ = std::fs::remove_file(&socket_path);
                let _ = std::fs::remove_file(&pid_path);
                false
            }
        }
    }

    /// The PID recorded by the daemon, if any. Does not probe liveness.
    pub fn recorded_pid() -> Option<u32> {
        let pid_path = config::daemon_pid_path().ok()?;
        std::fs::read_to_string(&pid_path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Exchange one request/response pair, starting the daemon first if it
    /// is not running.
    pub async fn request(request: &DaemonRequest) -> Result<DaemonResponse> {
        crate::daemon::auto_start::ensure_running().await?;
        Self::request_no_spawn(request).await
    }

    /// Exchange one request/response pair with an already-running daemon.
    pub async fn request_no_spawn(request: &DaemonRequest) -> Result<DaemonResponse> {
        let socket_path = config::daemon_socket_path()?;
        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            KapcomError::DaemonConnection(format!(
                "failed to connect to daemon at {socket_path:?}: {e}"
            ))
        })?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_json_line(&mut write_half, request)
            .await
            .map_err(|e| KapcomError::DaemonProtocol(format!("failed to send request: {e}")))?;

        match read_json_line::<_, DaemonResponse>(&mut reader).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(KapcomError::DaemonProtocol(
                "daemon closed the connection before a full response line arrived".into(),
            )),
            Err(e) => Err(KapcomError::DaemonProtocol(format!(
                "failed to read response: {e}"
            ))),
        }
    }

    /// Probe an arbitrary socket path with a ping. Used by the daemon's
    /// own single-instance startup check, so it never spawns anything.
    pub async fn ping_socket(socket_path: &Path, timeout: Duration) -> bool {
        let probe = async {
            let stream = UnixStream::connect(socket_path).await.ok()?;
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            write_json_line(&mut write_half, &DaemonRequest::Ping)
                .await
                .ok()?;
            read_json_line::<_, DaemonResponse>(&mut reader)
                .await
                .ok()
                .flatten()
        };
        matches!(
            tokio::time::timeout(timeout, probe).await,
            Ok(Some(response)) if response.success
        )
    }
}

/// Whether a process with this PID exists. Probes without signaling.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn implausible_pid_is_dead() {
        // PID far above any default pid_max.
        assert!(!pid_alive(0x7fff_fff0));
    }

    #[tokio::test]
    async fn ping_socket_on_missing_path_is_false() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.sock");
        assert!(!DaemonClient::ping_socket(&path, Duration::from_millis(200)).await);
    }

    // One test for all the is_running file states: env vars are
    // process-wide, so splitting this up would race.
    #[test]
    fn is_running_tracks_pid_and_socket_files() {
        let dir = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("KAPCOM_HOME", dir.path()) };
        let daemon_dir = dir.path().join("daemon");
        std::fs::create_dir_all(&daemon_dir).unwrap();
        let pid_path = daemon_dir.join("kapcomd.pid");
        let socket_path = daemon_dir.join("kapcomd.sock");

        // Nothing on disk: not running.
        assert!(!DaemonClient::is_running());

        // Dead recorded PID plus a leftover socket: stale, and both
        // files are cleaned up.
        std::fs::write(&pid_path, "2147483632").unwrap();
        std::fs::write(&socket_path, b"").unwrap();
        assert!(!DaemonClient::is_running());
        assert!(!pid_path.exists());
        assert!(!socket_path.exists());

        // Socket with no PID on record: the socket is stale too.
        std::fs::write(&socket_path, b"").unwrap();
        assert!(!DaemonClient::is_running());
        assert!(!socket_path.exists());

        // Live PID and a socket path: running.
        std::fs::write(&pid_path, std::process::id().to_string()).unwrap();
        std::fs::write(&socket_path, b"").unwrap();
        assert!(DaemonClient::is_running());

        unsafe { std::env::remove_var("KAPCOM_HOME") };
    }
}
