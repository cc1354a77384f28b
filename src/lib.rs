//! kapcom - terminal-protocol client and connection daemon for a scripted
//! spacecraft console.
//!
//! The crate splits into three layers:
//!
//! - [`transport`]: byte streams to the remote console (TCP, tmux-hosted
//!   telnet), with pattern waiting and disconnect classification.
//! - [`protocol`]: the console dialogue itself - CPU selection menu,
//!   sentinel-framed command execution, output cleaning, remote error
//!   classification - plus [`health`] probing on top of it.
//! - [`daemon`]: a background process holding the one shared session,
//!   reached from the [`cli`] over newline-delimited JSON on a Unix
//!   socket.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod protocol;
pub mod transport;

pub use error::{KapcomError, Result};
