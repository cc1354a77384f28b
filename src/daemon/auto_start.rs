//! Transparent daemon startup.
//!
//! CLI commands that need the daemon call [`ensure_running`] first; the
//! daemon binary is expected to sit next to the CLI binary.

use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::config;
use crate::daemon::client::DaemonClient;
use crate::error::{KapcomError, Result};

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STARTUP_POLL_ATTEMPTS: u32 = 50;

/// Start the daemon if it is not already running, then wait for its
/// socket to come up.
pub async fn ensure_running() -> Result<()> {
    if DaemonClient::is_running() {
        return Ok(());
    }

    spawn_daemon()?;

    for _ in 0..STARTUP_POLL_ATTEMPTS {
        tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        if DaemonClient::is_running() {
            return Ok(());
        }
    }

    Err(KapcomError::DaemonConnection(format!(
        "daemon did not come up within {:?}; check {:?} for details",
        STARTUP_POLL_INTERVAL * STARTUP_POLL_ATTEMPTS,
        config::daemon_log_path().unwrap_or_default(),
    )))
}

/// Spawn `kapcomd` detached, with stdio routed to /dev/null. The daemon
/// writes its own log file.
fn spawn_daemon() -> Result<()> {
    let daemon_path = std::env::current_exe()
        .map_err(|e| KapcomError::DaemonConnection(format!("cannot locate own binary: {e}")))?
        .with_file_name("kapcomd");

    if !daemon_path.exists() {
        return Err(KapcomError::DaemonConnection(format!(
            "daemon binary not found at {daemon_path:?}"
        )));
    }

    // The daemon needs its state directory before it can log anything.
    std::fs::create_dir_all(config::daemon_dir()?)?;

    debug!(path = ?daemon_path, "spawning daemon");
    std::process::Command::new(&daemon_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            KapcomError::DaemonConnection(format!("failed to spawn {daemon_path:?}: {e}"))
        })?;

    Ok(())
}
