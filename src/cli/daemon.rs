//! Daemon CLI commands for managing the kapcomd process.
//!
//! The daemon normally starts itself on demand; these commands exist for
//! checking on it, bouncing it, and reading its log.

use std::path::Path;
use std::time::Duration;

use crate::cli::args::DaemonCommand;
use crate::config;
use crate::daemon::DaemonClient;
use crate::daemon::auto_start;
use crate::daemon::protocol::DaemonRequest;
use crate::error::Result;

pub async fn daemon(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Status => daemon_status().await,
        DaemonCommand::Start => daemon_start().await,
        DaemonCommand::Stop => daemon_stop().await,
        DaemonCommand::Logs { follow, lines } => daemon_logs(follow, lines).await,
    }
}

async fn daemon_status() -> Result<()> {
    if DaemonClient::is_running() {
        println!("Daemon status: running");
        if let Some(pid) = DaemonClient::recorded_pid() {
            println!("  PID: {pid}");
        }
        let socket_path = config::daemon_socket_path()?;
        println!("  Socket: {}", socket_path.display());
    } else {
        println!("Daemon status: not running");
        println!("  Run 'kapcom daemon start' or any exec command to start it.");
    }
    Ok(())
}

async fn daemon_start() -> Result<()> {
    if DaemonClient::is_running() {
        println!("Daemon is already running.");
        return Ok(());
    }

    match auto_start::ensure_running().await {
        Ok(()) => {
            println!("Daemon started successfully.");
            if let Some(pid) = DaemonClient::recorded_pid() {
                println!("  PID: {pid}");
            }
            Ok(())
        }
        Err(e) => {
            println!("Failed to start daemon: {e}");
            let log_path = config::daemon_log_path()?;
            println!("Check logs at: {}", log_path.display());
            Err(e)
        }
    }
}

async fn daemon_stop() -> Result<()> {
    if !DaemonClient::is_running() {
        println!("Daemon is not running.");
        return Ok(());
    }

    DaemonClient::request_no_spawn(&DaemonRequest::Shutdown).await?;

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !DaemonClient::is_running() {
            println!("Daemon stopped.");
            return Ok(());
        }
    }

    println!("Warning: Daemon may still be shutting down.");
    Ok(())
}

async fn daemon_logs(follow: bool, lines: usize) -> Result<()> {
    // tracing-appender's daily rotation appends the date, so the current
    // file is kapcomd.log.YYYY-MM-DD; pick the newest match.
    let daemon_dir = config::daemon_dir()?;
    let log_path = match newest_log_file(&daemon_dir)? {
        Some(path) => path,
        None => {
            println!("No daemon logs found in: {}", daemon_dir.display());
            println!("The daemon may not have been started yet.");
            return Ok(());
        }
    };

    if follow {
        follow_log(&log_path, lines).await
    } else {
        print_log_tail(&log_path, lines)
    }
}

fn newest_log_file(daemon_dir: &Path) -> Result<Option<std::path::PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, std::path::PathBuf)> = None;
    for entry in std::fs::read_dir(daemon_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("kapcomd.log") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn print_log_tail(path: &Path, lines: usize) -> Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    for line in &all[start..] {
        println!("{line}");
    }
    Ok(())
}

async fn follow_log(path: &Path, lines: usize) -> Result<()> {
    print_log_tail(path, lines)?;

    let mut offset = std::fs::metadata(path)?.len();
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => break, // rotated away
        };
        if len < offset {
            offset = 0; // truncated
        }
        if len > offset {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = std::fs::File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = String::new();
            file.read_to_string(&mut chunk)?;
            print!("{chunk}");
            offset = len;
        }
    }
    Ok(())
}
