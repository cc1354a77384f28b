//! Configuration and well-known paths.
//!
//! Everything lives under `~/.kapcom/` (override with `KAPCOM_HOME`):
//!
//! - `config.toml` - remote console target and daemon tuning
//! - `daemon/` - socket, PID file, and daemon log
//! - `logs/` - transport traces when `KAPCOM_TRACE` is set
//!
//! Precedence: environment variables (`KAPCOM_HOST`, `KAPCOM_PORT`,
//! `KAPCOM_TRANSPORT`) override `config.toml`, which overrides built-in
//! defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KapcomError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5410;
pub const DEFAULT_IDLE_SECS: u64 = 600;

/// Root state directory, `$KAPCOM_HOME` or `$HOME/.kapcom`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("KAPCOM_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| KapcomError::Config("cannot determine home directory".to_string()))?;
    Ok(home.join(".kapcom"))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn daemon_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("daemon"))
}

pub fn daemon_socket_path() -> Result<PathBuf> {
    Ok(daemon_dir()?.join("kapcomd.sock"))
}

pub fn daemon_pid_path() -> Result<PathBuf> {
    Ok(daemon_dir()?.join("kapcomd.pid"))
}

pub fn daemon_log_path() -> Result<PathBuf> {
    Ok(daemon_dir()?.join("kapcomd.log"))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("logs"))
}

/// How the byte stream to the console is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    /// telnet hosted inside a detached tmux session, for consoles that
    /// misbehave over a bare socket.
    Tmux,
}

impl std::str::FromStr for TransportKind {
    type Err = KapcomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "tmux" => Ok(TransportKind::Tmux),
            other => Err(KapcomError::Config(format!(
                "unknown transport '{other}' (expected 'tcp' or 'tmux')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds of inactivity before the daemon exits on its own.
    pub idle_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_secs: DEFAULT_IDLE_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load `config.toml` if present, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Ok(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                toml::from_str(&contents)?
            }
            _ => Config::default(),
        };

        if let Ok(host) = std::env::var("KAPCOM_HOST") {
            if !host.trim().is_empty() {
                config.remote.host = host;
            }
        }
        if let Ok(port) = std::env::var("KAPCOM_PORT") {
            config.remote.port = port.trim().parse().map_err(|_| {
                KapcomError::Config(format!("KAPCOM_PORT is not a port number: {port:?}"))
            })?;
        }
        if let Ok(transport) = std::env::var("KAPCOM_TRANSPORT") {
            config.remote.transport = transport.parse()?;
        }

        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.idle_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_console() {
        let config = Config::default();
        assert_eq!(config.remote.host, DEFAULT_HOST);
        assert_eq!(config.remote.port, DEFAULT_PORT);
        assert_eq!(config.remote.transport, TransportKind::Tcp);
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [remote]
            port = 5411
            transport = "tmux"
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.host, DEFAULT_HOST);
        assert_eq!(config.remote.port, 5411);
        assert_eq!(config.remote.transport, TransportKind::Tmux);
        assert_eq!(config.daemon.idle_secs, DEFAULT_IDLE_SECS);
    }

    #[test]
    fn transport_kind_parses_case_insensitively() {
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!(
            "Tmux".parse::<TransportKind>().unwrap(),
            TransportKind::Tmux
        );
        assert!("serial".parse::<TransportKind>().is_err());
    }
}
