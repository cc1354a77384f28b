//! Raw TCP transport to the remote console.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::transport::trace::TraceSink;
use crate::transport::{DETACH_BYTE, Pattern, TransportError};

/// How long `init` waits for the TCP connect to complete.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    buffer: String,
    trace: TraceSink,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            buffer: String::new(),
            trace: TraceSink::from_env(),
        }
    }

    pub async fn init(&mut self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                TransportError::Connect(format!("connect to {addr} timed out"))
            })?
            .map_err(|e| TransportError::Connect(format!("connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.buffer.clear();
        tracing::debug!(addr, "tcp transport connected");
        Ok(())
    }

    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        // The console expects CRLF line endings; normalize whatever the
        // caller hands us and make sure the command is terminated.
        let mut wire = text.replace("\r\n", "\n").replace('\r', "\n");
        while wire.ends_with('\n') {
            wire.pop();
        }
        let wire = wire.replace('\n', "\r\n") + "\r\n";
        self.send_raw(wire.as_bytes()).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Closed("transport not initialized".into()))?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        self.trace.record("send", bytes);
        Ok(())
    }

    pub async fn wait_for(
        &mut self,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];

        loop {
            if pattern.matches(&self.buffer) {
                return Ok(std::mem::take(&mut self.buffer));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout {
                    waiting_for: pattern.describe(),
                    partial: std::mem::take(&mut self.buffer),
                });
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::Closed("transport not initialized".into()))?;

            match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
                Err(_) => {
                    return Err(TransportError::Timeout {
                        waiting_for: pattern.describe(),
                        partial: std::mem::take(&mut self.buffer),
                    });
                }
                Ok(Ok(0)) => {
                    self.stream = None;
                    return Err(TransportError::Closed(
                        "remote closed the connection".into(),
                    ));
                }
                Ok(Ok(n)) => {
                    self.trace.record("recv", &chunk[..n]);
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&chunk[..n]));
                }
                Ok(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
            }
        }
    }

    pub async fn read(&mut self) -> Result<String, TransportError> {
        if let Some(stream) = self.stream.as_mut() {
            let mut chunk = [0u8; 4096];
            loop {
                match stream.try_read(&mut chunk) {
                    Ok(0) => {
                        self.stream = None;
                        break;
                    }
                    Ok(n) => {
                        self.trace.record("recv", &chunk[..n]);
                        self.buffer
                            .push_str(&String::from_utf8_lossy(&chunk[..n]));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        self.stream = None;
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(std::mem::take(&mut self.buffer))
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Best-effort graceful disengage so the console drops back to
            // its menu instead of holding a dead session.
            let _ = stream.write_all(&[DETACH_BYTE]).await;
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
            tracing::debug!("tcp transport closed");
        }
        self.buffer.clear();
    }
}
