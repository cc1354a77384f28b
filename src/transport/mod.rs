//! Byte-level duplex channels to the remote console.
//!
//! Two interchangeable implementations satisfy the same contract: a raw TCP
//! socket (default) and a tmux-backed session for human-observable
//! debugging. The protocol client is written against [`Transport`] and does
//! not care which one it holds.

pub mod tcp;
pub mod tmux;
pub mod trace;

use std::time::Duration;

use thiserror::Error;

pub use tcp::TcpTransport;
pub use tmux::TmuxTransport;

/// Control byte that detaches an attached terminal session back to the
/// CPU menu (Ctrl-D).
pub const DETACH_BYTE: u8 = 0x04;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        /// Everything received before the deadline. Partial output is often
        /// diagnostic, so it is carried rather than discarded.
        partial: String,
    },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("tmux error: {0}")]
    Tmux(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the channel itself died (reset, refused,
    /// closed, broken pipe). The protocol client discards its transport and
    /// forces a fresh connect when it sees one of these.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed(_) | TransportError::Connect(_) => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// The partial buffer carried by a timeout, if any.
    pub fn partial(&self) -> Option<&str> {
        match self {
            TransportError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// What a `wait_for` call is looking for in the receive buffer.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal substring anywhere in the buffer.
    Literal(String),
    /// Regular expression match.
    Regex(regex::Regex),
    /// Literal substring, but only counted when it appears outside of
    /// double-quoted text. Used for sentinels so the echoed
    /// `PRINT "TOKEN".` line never satisfies the wait.
    Unquoted(String),
}

impl Pattern {
    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Pattern::Literal(needle) => haystack.contains(needle),
            Pattern::Regex(re) => re.is_match(haystack),
            Pattern::Unquoted(needle) => contains_unquoted(haystack, needle),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Pattern::Literal(s) => format!("literal {s:?}"),
            Pattern::Regex(re) => format!("pattern /{re}/"),
            Pattern::Unquoted(s) => format!("unquoted {s:?}"),
        }
    }
}

/// Find `needle` in `haystack`, ignoring occurrences inside double quotes.
/// Quote state resets per line; the console never spans a string literal
/// across lines.
pub fn contains_unquoted(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    for line in haystack.lines() {
        let mut in_quote = false;
        for (i, ch) in line.char_indices() {
            if ch == '"' {
                in_quote = !in_quote;
                continue;
            }
            if !in_quote && line[i..].starts_with(needle) {
                return true;
            }
        }
    }
    false
}

/// A duplex channel to the remote console. Enum dispatch keeps the protocol
/// client free of generics while both implementations share one contract.
pub enum Transport {
    Tcp(TcpTransport),
    Tmux(TmuxTransport),
}

impl Transport {
    /// Establish the channel. Fails with a connect-kind error if the remote
    /// is unreachable within the connect timeout.
    pub async fn init(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Tcp(t) => t.init().await,
            Transport::Tmux(t) => t.init().await,
        }
    }

    /// Send text, normalizing line termination to CRLF.
    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        match self {
            Transport::Tcp(t) => t.send(text).await,
            Transport::Tmux(t) => t.send(text).await,
        }
    }

    /// Send raw bytes without any normalization (control bytes).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            Transport::Tcp(t) => t.send_raw(bytes).await,
            Transport::Tmux(t) => t.send_raw(bytes).await,
        }
    }

    /// Block until the accumulated receive buffer matches `pattern`, or the
    /// timeout expires. On a match the whole buffer is drained and returned;
    /// on timeout the partial buffer rides along in the error.
    pub async fn wait_for(
        &mut self,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        match self {
            Transport::Tcp(t) => t.wait_for(pattern, timeout).await,
            Transport::Tmux(t) => t.wait_for(pattern, timeout).await,
        }
    }

    /// Drain and return whatever has accumulated, without blocking.
    pub async fn read(&mut self) -> Result<String, TransportError> {
        match self {
            Transport::Tcp(t) => t.read().await,
            Transport::Tmux(t) => t.read().await,
        }
    }

    /// Attempt one graceful disengage (detach byte) and tear the channel
    /// down. Idempotent.
    pub async fn close(&mut self) {
        match self {
            Transport::Tcp(t) => t.close().await,
            Transport::Tmux(t) => t.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquoted_skips_quoted_occurrence() {
        let text = "PRINT \"TOKEN123\".\nTOKEN123\n";
        assert!(contains_unquoted(text, "TOKEN123"));
        // Only the echo, never the result: no match.
        assert!(!contains_unquoted("PRINT \"TOKEN123\".\n", "TOKEN123"));
    }

    #[test]
    fn unquoted_quote_state_resets_per_line() {
        // Odd quote count on one line must not hide a match on the next.
        let text = "say \"unterminated\nTOKEN123\n";
        assert!(contains_unquoted(text, "TOKEN123"));
    }

    #[test]
    fn unquoted_empty_needle_never_matches() {
        assert!(!contains_unquoted("anything", ""));
    }

    #[test]
    fn literal_and_regex_patterns_match() {
        assert!(Pattern::Literal("Pick a CPU".into()).matches("blah Pick a CPU:\n"));
        let re = regex::Regex::new(r"(?m)^>\s*$").unwrap();
        assert!(Pattern::Regex(re).matches("output\n> \n"));
    }

    #[test]
    fn disconnect_classification() {
        let reset: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer").into();
        assert!(reset.is_disconnect());
        assert!(TransportError::Closed("eof".into()).is_disconnect());
        let timeout = TransportError::Timeout {
            waiting_for: "x".into(),
            partial: String::new(),
        };
        assert!(!timeout.is_disconnect());
    }
}
