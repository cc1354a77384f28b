//! Terminal protocol client for the remote console.
//!
//! The console is a menu-driven, human-oriented scripting terminal: it
//! echoes input, decorates output with private control codes, and has no
//! notion of request IDs. This module frames command executions so their
//! output can be delimited unambiguously, classifies known remote errors,
//! and tracks connection state.

pub mod clean;
pub mod client;
pub mod errors;
pub mod menu;
pub mod sentinel;

use serde::{Deserialize, Serialize};

pub use client::{ProtocolClient, Timeouts};

/// Snapshot of the protocol client's connection state. Owned exclusively by
/// the client; callers only ever see clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    /// Selected CPU id. `connected == false` implies `None`.
    pub cpu_id: Option<u32>,
    pub cpu_tag: Option<String>,
    pub vessel_name: Option<String>,
    pub last_error: Option<String>,
}

/// Result of one command execution. Immutable once returned; remote
/// semantic errors land here as structured failures rather than being
/// thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn fail(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// How the caller names the CPU it wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuSelector {
    /// First CPU listed in the menu.
    Any,
    /// Explicit numeric menu id.
    Id(u32),
    /// Nameplate tag, matched case-insensitively against the menu.
    Tag(String),
}

impl CpuSelector {
    pub fn from_parts(id: Option<u32>, label: Option<String>) -> Self {
        match (id, label) {
            (Some(id), _) => CpuSelector::Id(id),
            (None, Some(label)) => CpuSelector::Tag(label),
            (None, None) => CpuSelector::Any,
        }
    }

    /// Parse a CLI-style selector: numeric text is an id, anything else a tag.
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<u32>() {
            Ok(id) => CpuSelector::Id(id),
            Err(_) => CpuSelector::Tag(text.trim().to_string()),
        }
    }
}

/// What `connect` reports back once a CPU is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub vessel_name: String,
    pub cpu_id: u32,
    pub cpu_tag: String,
}
