//! Connection-management daemon and its IPC client.

pub mod auto_start;
pub mod client;
pub mod handlers;
pub mod listener;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use protocol::{DaemonRequest, DaemonResponse};
