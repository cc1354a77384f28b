//! CPU menu parsing and selector resolution.
//!
//! The console greets every fresh session with a menu of addressable CPUs:
//!
//! ```text
//! Pick a CPU to attach to:
//! [1] no  0  Relay Alpha (Console CPU(uplink))
//! [2] yes 1  Relay Alpha (Console CPU(backup))
//! ```
//!
//! Line grammar: `[<id>] <guiOpenYesNo> <telnetCount> <vesselName>
//! (<partName>(<tag>))`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KapcomError, Result};
use crate::protocol::CpuSelector;

/// Marker that tells us the menu is on screen.
pub const MENU_MARKER: &str = "Pick a CPU";

static MENU_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\[(\d+)\]\s+(\S+)\s+(\d+)\s+(.+?)\s*\((.*?)\((.*?)\)\)\s*$")
        .expect("menu line regex")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuEntry {
    pub id: u32,
    /// Whether the in-game terminal window is open for this CPU.
    pub gui_open: bool,
    /// Number of remote terminals already attached.
    pub telnet_count: u32,
    pub vessel_name: String,
    pub part_name: String,
    pub tag: String,
}

/// Parse every menu line found in `text`. Non-menu lines are ignored, so
/// the whole raw buffer can be fed in.
pub fn parse_menu(text: &str) -> Vec<MenuEntry> {
    MENU_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(MenuEntry {
                id: caps[1].parse().ok()?,
                gui_open: caps[2].eq_ignore_ascii_case("yes"),
                telnet_count: caps[3].parse().ok()?,
                vessel_name: caps[4].trim().to_string(),
                part_name: caps[5].trim().to_string(),
                tag: caps[6].trim().to_string(),
            })
        })
        .collect()
}

/// Resolve a selector against parsed menu entries.
///
/// Ids and tags must match a listed entry (tags case-insensitively); no
/// selector picks the first listed CPU.
pub fn resolve<'a>(entries: &'a [MenuEntry], selector: &CpuSelector) -> Result<&'a MenuEntry> {
    match selector {
        CpuSelector::Id(id) => entries
            .iter()
            .find(|e| e.id == *id)
            .ok_or_else(|| not_found(&id.to_string(), entries)),
        CpuSelector::Tag(tag) => entries
            .iter()
            .find(|e| e.tag.eq_ignore_ascii_case(tag))
            .ok_or_else(|| not_found(tag, entries)),
        CpuSelector::Any => entries.first().ok_or_else(|| {
            KapcomError::RemoteUnreachable("CPU menu listed no CPUs".to_string())
        }),
    }
}

fn not_found(requested: &str, entries: &[MenuEntry]) -> KapcomError {
    let available = if entries.is_empty() {
        "(none)".to_string()
    } else {
        entries
            .iter()
            .map(|e| format!("[{}] {} ({})", e.id, e.vessel_name, e.tag))
            .collect::<Vec<_>>()
            .join(", ")
    };
    KapcomError::CpuNotFound {
        requested: requested.to_string(),
        available,
    }
}
