//! Unix socket listener for accepting CLI connections.
//!
//! The socket file is created with mode 0600 and removed when the listener
//! drops.

use std::path::{Path, PathBuf};

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::daemon::protocol::{DaemonRequest, DaemonResponse, read_json_line, write_json_line};
use crate::error::Result;

pub struct IpcListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcListener {
    /// Bind to a Unix domain socket at the given path, creating the parent
    /// directory and replacing any stale socket file.
    pub async fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// One CLI client connection: newline-delimited JSON, one response per
/// request.
pub struct IpcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcConnection {
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Receive the next request. `Ok(None)` means the client hung up.
    pub async fn recv_request(&mut self) -> Result<Option<DaemonRequest>> {
        Ok(read_json_line(&mut self.reader).await?)
    }

    pub async fn send_response(&mut self, response: &DaemonResponse) -> Result<()> {
        write_json_line(&mut self.writer, response).await?;
        Ok(())
    }
}
