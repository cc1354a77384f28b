//! Classification of known remote error text.
//!
//! The console reports failures as prose in the output stream. An ordered
//! substring table turns the ones we know into structured failures;
//! ordering matters because the one-shot "Signal lost" banner must win over
//! anything else that happens to be on screen.

use serde::Serialize;

/// Banner the console emits exactly once when radio contact drops. After
/// it has been consumed, later probes see nothing but echo.
pub const SIGNAL_LOST_BANNER: &str = "Signal lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    SignalLost,
    ConnectionRefused,
    Unreachable,
    UnknownMethod,
    UnknownIdentifier,
    Aborted,
    Syntax,
    TypeMismatch,
    MissingNode,
    NoTarget,
}

impl RemoteErrorKind {
    /// Human-facing description, including what action resolves the
    /// condition where one exists.
    pub fn message(&self) -> &'static str {
        match self {
            RemoteErrorKind::SignalLost => {
                "Signal lost: the vessel is out of radio contact. Wait until contact is regained, then retry."
            }
            RemoteErrorKind::ConnectionRefused => {
                "Remote console refused the connection. Check that the terminal server is enabled."
            }
            RemoteErrorKind::Unreachable => "Remote console unreachable.",
            RemoteErrorKind::UnknownMethod => "Script called a method the remote does not know.",
            RemoteErrorKind::UnknownIdentifier => "Script referenced an undefined identifier.",
            RemoteErrorKind::Aborted => "Remote program aborted.",
            RemoteErrorKind::Syntax => "Script has a syntax error.",
            RemoteErrorKind::TypeMismatch => "Script hit a type mismatch.",
            RemoteErrorKind::MissingNode => {
                "No maneuver node exists. Plan a maneuver before executing one."
            }
            RemoteErrorKind::NoTarget => {
                "No target selected. Set a target before running target-relative operations."
            }
        }
    }
}

/// Ordered table of (needle, kind); first match wins, matched
/// case-insensitively.
const RULES: &[(&str, RemoteErrorKind)] = &[
    (SIGNAL_LOST_BANNER, RemoteErrorKind::SignalLost),
    ("Connection refused", RemoteErrorKind::ConnectionRefused),
    ("Destination unreachable", RemoteErrorKind::Unreachable),
    ("Cannot call method", RemoteErrorKind::UnknownMethod),
    ("Undefined Variable Name", RemoteErrorKind::UnknownIdentifier),
    ("Program aborted", RemoteErrorKind::Aborted),
    ("Syntax error", RemoteErrorKind::Syntax),
    ("Type mismatch", RemoteErrorKind::TypeMismatch),
    ("No maneuver nodes present", RemoteErrorKind::MissingNode),
    ("No target selected", RemoteErrorKind::NoTarget),
];

/// Classify cleaned command output against the known-error table.
pub fn classify(output: &str) -> Option<RemoteErrorKind> {
    let lowered = output.to_lowercase();
    RULES
        .iter()
        .find(|(needle, _)| lowered.contains(&needle.to_lowercase()))
        .map(|(_, kind)| *kind)
}
