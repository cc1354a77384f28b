//! Wire protocol between CLI and daemon.
//!
//! Newline-delimited JSON over a Unix domain socket: one object per line,
//! one response per request. Requests are a tagged enum, so an unknown
//! `type` is rejected at deserialization rather than leaking into
//! dispatch.
//!
//! Minimum shapes:
//!
//! ```json
//! {"type":"ping"}                                      -> {"success":true,"output":"pong"}
//! {"type":"execute","command":"PRINT 1+1.","timeout":5000}
//!                                                      -> {"success":true,"output":"2","connected":true}
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Cap on one request/response line, to bound memory per connection.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DaemonRequest {
    /// Liveness probe; also used by the single-instance startup check.
    Ping,
    /// Connection-state snapshot.
    Status,
    /// Select a CPU (fresh handshake), by numeric id or nameplate tag.
    #[serde(rename_all = "camelCase")]
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_id: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_label: Option<String>,
    },
    /// Drop the shared session.
    Disconnect,
    /// Run one script; auto-connects if needed. `timeout` in milliseconds.
    Execute {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    /// Invoke a named higher-level handler; auto-connects if needed.
    Call {
        handler: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Graceful daemon shutdown.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DaemonResponse {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            connected: None,
            data: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            output: None,
            error: None,
            connected: None,
            data: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            connected: None,
            data: None,
        }
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = Some(connected);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Serialize `value` as one JSON line and write it.
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated JSON value. `Ok(None)` means the peer
/// closed the connection cleanly before sending another line.
pub async fn read_json_line<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line too long: {} bytes (max {})", line.len(), MAX_LINE_BYTES),
        ));
    }
    let value = serde_json::from_str(line.trim_end())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
