//! kapcom daemon - owns the single terminal session to the remote console.
//!
//! The kapcomd binary is a long-running background process that:
//! - Accepts IPC connections from the CLI over a Unix domain socket
//! - Holds one shared telnet-style session to the game console
//! - Health-checks and transparently recycles stale sessions
//! - Shuts down on SIGTERM/SIGINT, an IPC shutdown request, or idleness
//!
//! ## Usage
//!
//! The daemon is typically started automatically by the CLI when needed.
//! Manual start: `kapcomd`
//!
//! ## Files
//!
//! - `~/.kapcom/daemon/kapcomd.sock` - Unix socket for IPC
//! - `~/.kapcom/daemon/kapcomd.pid` - PID file for process tracking
//! - `~/.kapcom/daemon/kapcomd.log` - Daemon log file (daily rotation)

use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;

use kapcom::config::{self, Config};
use kapcom::daemon::client::{DaemonClient, pid_alive};
use kapcom::daemon::listener::IpcListener;
use kapcom::daemon::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let daemon_dir = config::daemon_dir()?;
    std::fs::create_dir_all(&daemon_dir)?;

    let _guard = init_logging(&daemon_dir)?;

    tracing::info!("kapcomd starting, version {}", env!("CARGO_PKG_VERSION"));

    // Single-instance check: a live socket or a live PID means another
    // daemon owns the session. Stale leftovers from an unclean shutdown
    // are removed instead.
    let socket_path = config::daemon_socket_path()?;
    if socket_path.exists() {
        if DaemonClient::ping_socket(&socket_path, Duration::from_secs(2)).await {
            eprintln!("kapcomd is already running (socket {socket_path:?} answered ping)");
            std::process::exit(1);
        }
        tracing::warn!(path = ?socket_path, "removing stale socket from previous run");
        std::fs::remove_file(&socket_path)?;
    }

    let pid_path = config::daemon_pid_path()?;
    if let Ok(contents) = std::fs::read_to_string(&pid_path) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if pid_alive(pid) {
                eprintln!("kapcomd is already running (pid {pid})");
                std::process::exit(1);
            }
        }
        tracing::warn!(path = ?pid_path, "removing stale PID file from previous run");
        std::fs::remove_file(&pid_path)?;
    }

    std::fs::write(&pid_path, std::process::id().to_string())?;

    // From here on every exit path, including startup failures, must
    // remove the PID file again.
    let result = serve(&socket_path).await;
    let _ = std::fs::remove_file(&pid_path);
    result?;

    tracing::info!("kapcomd shutdown complete");
    Ok(())
}

async fn serve(socket_path: &std::path::Path) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::info!(
        host = %config.remote.host,
        port = config.remote.port,
        transport = ?config.remote.transport,
        "remote console target"
    );

    let listener = IpcListener::bind(socket_path).await?;
    server::run(config, listener).await?;
    Ok(())
}

/// Initialize file-based logging with daily rotation.
///
/// The returned `WorkerGuard` must be kept alive for the duration of the
/// program so buffered logs are flushed on exit.
fn init_logging(daemon_dir: &std::path::Path) -> anyhow::Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(daemon_dir, "kapcomd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    Ok(guard)
}
