//! Integration tests for the kapcom daemon.
//!
//! Each test gets its own temporary KAPCOM_HOME, its own fake remote
//! console on a loopback port, and its own kapcomd process, and talks to
//! the daemon over its Unix socket directly.

#![cfg(unix)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::time::sleep;

use kapcom::daemon::protocol::{DaemonRequest, DaemonResponse, read_json_line, write_json_line};

/// A stand-in for the game console's telnet server.
///
/// Accepts any number of sequential connections. Each connection gets the
/// CPU menu, acks the selection with the ready banner, and then answers a
/// tiny script vocabulary:
///
/// - `PRINT 1+1.` prints `2`
/// - `PRINT "<text>".` prints `<text>` without quotes
/// - `KILL.` drops the connection without warning
async fn fake_console(listener: TcpListener) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        tokio::spawn(console_session(stream));
    }
}

async fn console_session(stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Entries first, marker line last, so the whole menu is always
    // buffered by the time a client reacts to the marker.
    let menu = "Connected to the terminal server.\r\n\
                [1] no 0 Test Vessel (Console CPU(cx-1))\r\n\
                Pick a CPU to attach to:\r\n";
    if write_half.write_all(menu.as_bytes()).await.is_err() {
        return;
    }

    let mut selected = false;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let statement = line.trim_matches(|c: char| c.is_whitespace() || c == '\u{4}');
        if statement.is_empty() {
            continue;
        }

        if !selected {
            selected = true;
            let _ = write_half.write_all(b"Proceed.\r\n").await;
            continue;
        }

        if statement == "KILL." {
            return;
        }
        if statement == "PRINT 1+1." {
            let _ = write_half.write_all(b"2\r\n").await;
        } else if let Some(rest) = statement.strip_prefix("PRINT \"") {
            if let Some(end) = rest.find('"') {
                let reply = format!("{}\r\n", &rest[..end]);
                let _ = write_half.write_all(reply.as_bytes()).await;
            }
        }
        // Anything else is swallowed, like a statement with no output.
    }
}

/// One isolated daemon: temp home, fake console, kapcomd child process.
struct TestDaemon {
    temp_dir: TempDir,
    process: Option<Child>,
    socket_path: PathBuf,
}

impl TestDaemon {
    async fn start() -> Result<Self, String> {
        let temp_dir = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;

        let console_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| format!("Failed to bind fake console: {e}"))?;
        let console_port = console_listener
            .local_addr()
            .map_err(|e| e.to_string())?
            .port();
        tokio::spawn(fake_console(console_listener));

        let daemon_dir = temp_dir.path().join(".kapcom").join("daemon");
        std::fs::create_dir_all(&daemon_dir)
            .map_err(|e| format!("Failed to create daemon dir: {e}"))?;
        let socket_path = daemon_dir.join("kapcomd.sock");

        let process = spawn_daemon(temp_dir.path(), console_port)?;
        let mut instance = Self {
            temp_dir,
            process: Some(process),
            socket_path,
        };

        // Wait for the daemon socket to answer a ping (up to 5 seconds).
        for _ in 0..50 {
            sleep(Duration::from_millis(100)).await;
            if instance.try_ping().await {
                return Ok(instance);
            }
            if let Some(proc) = instance.process.as_mut() {
                if let Ok(Some(status)) = proc.try_wait() {
                    return Err(format!("Daemon exited prematurely with status {status:?}"));
                }
            }
        }
        Err(format!(
            "Daemon failed to start within 5 seconds; socket: {:?}",
            instance.socket_path
        ))
    }

    async fn try_ping(&self) -> bool {
        matches!(
            self.request(&DaemonRequest::Ping).await,
            Ok(response) if response.success
        )
    }

    /// One request/response round trip over a fresh socket connection,
    /// the same way the CLI talks to the daemon.
    async fn request(&self, request: &DaemonRequest) -> Result<DaemonResponse, String> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_json_line(&mut write_half, request)
            .await
            .map_err(|e| format!("send failed: {e}"))?;
        read_json_line::<_, DaemonResponse>(&mut reader)
            .await
            .map_err(|e| format!("recv failed: {e}"))?
            .ok_or_else(|| "daemon hung up without responding".to_string())
    }

    fn home_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(proc) = self.process.as_mut() {
            let _ = proc.kill();
            let _ = proc.wait();
        }
    }
}

fn spawn_daemon(home: &std::path::Path, console_port: u16) -> Result<Child, String> {
    let daemon_path = find_daemon_binary()?;
    Command::new(&daemon_path)
        .env("KAPCOM_HOME", home.join(".kapcom"))
        .env("HOME", home)
        .env("KAPCOM_HOST", "127.0.0.1")
        .env("KAPCOM_PORT", console_port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to spawn daemon: {e}"))
}

/// Find the kapcomd binary built alongside the test binary.
fn find_daemon_binary() -> Result<PathBuf, String> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let target_dir = PathBuf::from(manifest_dir).join("target");

    for profile in ["debug", "release"] {
        let candidate = target_dir.join(profile).join("kapcomd");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // cargo test puts the test binary in target/<profile>/deps; kapcomd
    // sits one level up.
    if let Ok(exe) = std::env::current_exe() {
        for dir in exe.ancestors().skip(1).take(3) {
            let candidate = dir.join("kapcomd");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    Err("kapcomd binary not found; run `cargo build` first".to_string())
}

#[tokio::test]
async fn execute_auto_connects_and_returns_output() {
    let daemon = TestDaemon::start().await.expect("daemon starts");

    let response = daemon
        .request(&DaemonRequest::Execute {
            command: "PRINT 1+1.".into(),
            timeout: Some(5000),
        })
        .await
        .expect("round trip");

    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.output.as_deref(), Some("2"));
    assert_eq!(response.connected, Some(true));

    let status = daemon
        .request(&DaemonRequest::Status)
        .await
        .expect("status round trip");
    assert_eq!(status.connected, Some(true));
}

#[tokio::test]
async fn dropped_connection_is_reported_and_recovered() {
    let daemon = TestDaemon::start().await.expect("daemon starts");

    // Warm the session up.
    let warm = daemon
        .request(&DaemonRequest::Execute {
            command: "PRINT 1+1.".into(),
            timeout: Some(5000),
        })
        .await
        .expect("round trip");
    assert!(warm.success);

    // The console drops the line mid-command.
    let killed = daemon
        .request(&DaemonRequest::Execute {
            command: "KILL.".into(),
            timeout: Some(3000),
        })
        .await
        .expect("round trip");
    assert!(!killed.success);
    assert_eq!(killed.connected, Some(false));

    let status = daemon
        .request(&DaemonRequest::Status)
        .await
        .expect("status round trip");
    assert_eq!(status.connected, Some(false));

    // Next execute transparently reconnects to the fake console.
    let recovered = daemon
        .request(&DaemonRequest::Execute {
            command: "PRINT 1+1.".into(),
            timeout: Some(5000),
        })
        .await
        .expect("round trip");
    assert!(recovered.success, "error: {:?}", recovered.error);
    assert_eq!(recovered.output.as_deref(), Some("2"));
    assert_eq!(recovered.connected, Some(true));
}

#[tokio::test]
async fn connect_selects_listed_cpu_and_rejects_missing_one() {
    let daemon = TestDaemon::start().await.expect("daemon starts");

    let connected = daemon
        .request(&DaemonRequest::Connect {
            context_id: Some(1),
            context_label: None,
        })
        .await
        .expect("round trip");
    assert!(connected.success, "error: {:?}", connected.error);
    let data = connected.data.expect("connect payload");
    assert_eq!(data["vesselName"], serde_json::json!("Test Vessel"));
    assert_eq!(data["cpuId"], serde_json::json!(1));
    assert_eq!(data["cpuTag"], serde_json::json!("cx-1"));

    let missing = daemon
        .request(&DaemonRequest::Connect {
            context_id: Some(9),
            context_label: None,
        })
        .await
        .expect("round trip");
    assert!(!missing.success);
    let message = missing.error.expect("error message");
    assert!(message.contains("9"), "unexpected message: {message}");
    assert!(message.contains("Test Vessel"), "menu not listed: {message}");
}

#[tokio::test]
async fn second_daemon_instance_refuses_to_start() {
    let daemon = TestDaemon::start().await.expect("daemon starts");

    let daemon_path = find_daemon_binary().expect("kapcomd binary");
    let status = Command::new(&daemon_path)
        .env("KAPCOM_HOME", daemon.home_path().join(".kapcom"))
        .env("HOME", daemon.home_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("second instance runs to completion");
    assert!(!status.success(), "second daemon should exit non-zero");

    // The first daemon is unharmed.
    assert!(daemon.try_ping().await);
}

#[tokio::test]
async fn failed_startup_leaves_no_pid_file_behind() {
    let temp_dir = TempDir::new().expect("temp dir");
    let daemon_dir = temp_dir.path().join(".kapcom").join("daemon");
    std::fs::create_dir_all(&daemon_dir).expect("daemon dir");

    // An unparseable port makes config loading fail after the PID file
    // is written.
    let daemon_path = find_daemon_binary().expect("kapcomd binary");
    let status = Command::new(&daemon_path)
        .env("KAPCOM_HOME", temp_dir.path().join(".kapcom"))
        .env("HOME", temp_dir.path())
        .env("KAPCOM_PORT", "not-a-port")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("daemon runs to completion");

    assert!(!status.success(), "startup should fail on a bad port");
    assert!(
        !daemon_dir.join("kapcomd.pid").exists(),
        "PID file must be cleaned up when startup fails"
    );
}

#[tokio::test]
async fn shutdown_request_stops_the_daemon() {
    let mut daemon = TestDaemon::start().await.expect("daemon starts");

    let ack = daemon
        .request(&DaemonRequest::Shutdown)
        .await
        .expect("round trip");
    assert!(ack.success);

    // The process exits and removes its socket.
    let mut exited = false;
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        if let Some(proc) = daemon.process.as_mut() {
            if proc.try_wait().ok().flatten().is_some() {
                exited = true;
                break;
            }
        }
    }
    assert!(exited, "daemon did not exit after shutdown request");
    daemon.process = None;
    assert!(!daemon.socket_path.exists());
}
