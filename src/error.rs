//! Crate-wide error type and process exit codes.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum KapcomError {
    /// The remote console could not be reached or never produced its
    /// selection menu.
    #[error("Remote console unreachable: {0}")]
    RemoteUnreachable(String),

    /// The requested CPU is not in the selection menu.
    #[error("No CPU matching '{requested}'. Available: {available}")]
    CpuNotFound {
        requested: String,
        available: String,
    },

    #[error("Not connected to a CPU")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Could not reach (or start) the background daemon.
    #[error("Daemon connection error: {0}")]
    DaemonConnection(String),

    /// The daemon answered with something other than one JSON line.
    #[error("Daemon protocol error: {0}")]
    DaemonProtocol(String),

    /// The daemon handled the request and reported failure.
    #[error("{0}")]
    DaemonError(String),
}

/// Process exit codes for the CLI.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const USER_ERROR: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
    pub const UNREACHABLE: i32 = 4;
}

impl KapcomError {
    pub fn exit_code(&self) -> i32 {
        match self {
            KapcomError::InvalidArgument(_) => exit_codes::USER_ERROR,
            KapcomError::CpuNotFound { .. } => exit_codes::NOT_FOUND,
            KapcomError::RemoteUnreachable(_) => exit_codes::UNREACHABLE,
            _ => exit_codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, KapcomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_by_category() {
        assert_eq!(
            KapcomError::InvalidArgument("x".into()).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(
            KapcomError::CpuNotFound {
                requested: "9".into(),
                available: "[1] Vessel".into(),
            }
            .exit_code(),
            exit_codes::NOT_FOUND
        );
        assert_eq!(
            KapcomError::RemoteUnreachable("no menu".into()).exit_code(),
            exit_codes::UNREACHABLE
        );
        assert_eq!(
            KapcomError::DaemonError("boom".into()).exit_code(),
            exit_codes::INTERNAL
        );
    }

    #[test]
    fn cpu_not_found_names_the_request_and_menu() {
        let err = KapcomError::CpuNotFound {
            requested: "uplink".into(),
            available: "[1] Kerbal X (core)".into(),
        };
        let message = err.to_string();
        assert!(message.contains("uplink"));
        assert!(message.contains("Kerbal X"));
    }
}
