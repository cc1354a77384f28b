//! tmux-backed transport.
//!
//! Runs the console connection inside a detached tmux session so a human
//! can `tmux attach` and watch the terminal while kapcom drives it. Input
//! goes through `send-keys`, output comes back from `capture-pane`
//! polling. Strictly a debugging aid; the TCP transport is the default.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;

use crate::transport::trace::TraceSink;
use crate::transport::{Pattern, TransportError};

/// Poll interval for capture-pane while waiting on a pattern.
const CAPTURE_INTERVAL: Duration = Duration::from_millis(100);

pub struct TmuxTransport {
    host: String,
    port: u16,
    session: String,
    alive: bool,
    /// Bytes of captured pane history already handed to the caller. The
    /// pane only ever grows (history limit raised at creation), so a plain
    /// offset is enough to extract the new suffix.
    seen: usize,
    buffer: String,
    trace: TraceSink,
}

impl TmuxTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            session: format!("kapcom-{}", std::process::id()),
            alive: false,
            seen: 0,
            buffer: String::new(),
            trace: TraceSink::from_env(),
        }
    }

    /// Name of the tmux session, for `tmux attach -t <name>`.
    pub fn session_name(&self) -> &str {
        &self.session
    }

    async fn tmux(&self, args: &[&str]) -> Result<String, TransportError> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| TransportError::Tmux(format!("failed to run tmux: {e}")))?;
        if !output.status.success() {
            return Err(TransportError::Tmux(format!(
                "tmux {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn init(&mut self) -> Result<(), TransportError> {
        let shell = format!("telnet {} {}", self.host, self.port);
        self.tmux(&[
            "new-session",
            "-d",
            "-s",
            &self.session,
            "-x",
            "200",
            "-y",
            "50",
            &shell,
        ])
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.tmux(&["set-option", "-t", &self.session, "history-limit", "50000"])
            .await
            .ok();
        self.alive = true;
        self.seen = 0;
        self.buffer.clear();
        tracing::debug!(session = %self.session, "tmux transport started");
        Ok(())
    }

    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.alive {
            return Err(TransportError::Closed("tmux session not started".into()));
        }
        for line in text.replace("\r\n", "\n").replace('\r', "\n").split('\n') {
            if !line.is_empty() {
                self.tmux(&["send-keys", "-t", &self.session, "-l", "--", line])
                    .await?;
            }
            self.tmux(&["send-keys", "-t", &self.session, "Enter"]).await?;
        }
        self.trace.record("send", text.as_bytes());
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.alive {
            return Err(TransportError::Closed("tmux session not started".into()));
        }
        for &byte in bytes {
            // Control bytes travel as tmux key names; 0x01..=0x1a map to C-a..C-z.
            let key = match byte {
                0x01..=0x1a => format!("C-{}", (b'a' + byte - 1) as char),
                other => format!("{}", other as char),
            };
            self.tmux(&["send-keys", "-t", &self.session, &key]).await?;
        }
        self.trace.record("send", bytes);
        Ok(())
    }

    /// Capture the full pane history and fold the unseen suffix into the
    /// receive buffer.
    async fn capture(&mut self) -> Result<(), TransportError> {
        let captured = self
            .tmux(&["capture-pane", "-p", "-J", "-t", &self.session, "-S", "-"])
            .await?;
        let trimmed = captured.trim_end_matches('\n');
        if trimmed.len() > self.seen {
            let fresh = &trimmed[self.seen..];
            self.trace.record("recv", fresh.as_bytes());
            self.buffer.push_str(fresh);
            self.seen = trimmed.len();
        }
        Ok(())
    }

    pub async fn wait_for(
        &mut self,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        if !self.alive {
            return Err(TransportError::Closed("tmux session not started".into()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.capture().await?;
            if pattern.matches(&self.buffer) {
                return Ok(std::mem::take(&mut self.buffer));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    waiting_for: pattern.describe(),
                    partial: std::mem::take(&mut self.buffer),
                });
            }
            tokio::time::sleep(CAPTURE_INTERVAL).await;
        }
    }

    pub async fn read(&mut self) -> Result<String, TransportError> {
        if self.alive {
            self.capture().await?;
        }
        Ok(std::mem::take(&mut self.buffer))
    }

    pub async fn close(&mut self) {
        if self.alive {
            let _ = self
                .tmux(&["send-keys", "-t", &self.session, "C-d"])
                .await;
            let _ = self.tmux(&["kill-session", "-t", &self.session]).await;
            self.alive = false;
            tracing::debug!(session = %self.session, "tmux transport closed");
        }
        self.buffer.clear();
    }
}
