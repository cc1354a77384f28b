//! Per-command sentinels.
//!
//! The console has no request IDs; the only way to know a command finished
//! is to print a marker after it and wait for the marker to show up as a
//! real result. Tokens combine a monotonic sequence number with a hash of
//! the command content, the clock, and fresh randomness so they cannot
//! collide with script output or with each other.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::transport::Pattern;

static SEQ: AtomicU64 = AtomicU64::new(1);

/// Single-use end-of-output marker. Lives for one execution.
#[derive(Debug, Clone)]
pub struct Sentinel {
    token: String,
}

impl Sentinel {
    /// Generate a fresh sentinel for `script`.
    pub fn generate(script: &str) -> Self {
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            token: format!("KAPCOM{}X{}", seq, content_hash(script)),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The trivial follow-up command that prints this sentinel.
    pub fn print_command(&self) -> String {
        format!("PRINT \"{}\".", self.token)
    }

    /// Wait pattern: the token, but never inside quotes, so the echoed
    /// print command cannot satisfy it.
    pub fn pattern(&self) -> Pattern {
        Pattern::Unquoted(self.token.clone())
    }
}

/// A unique uppercase marker for health probes and similar one-off prints.
pub fn unique_marker(prefix: &str) -> String {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}{}X{}", prefix, seq, content_hash(prefix))
}

fn content_hash(content: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
        .hash(&mut hasher);
    rand::random::<u64>().hash(&mut hasher);
    format!("{:08X}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::contains_unquoted;

    #[test]
    fn tokens_are_unique_per_generation() {
        let a = Sentinel::generate("PRINT 1.");
        let b = Sentinel::generate("PRINT 1.");
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn pattern_ignores_echo_matches_result() {
        let sentinel = Sentinel::generate("PRINT 1.");
        let echo_only = format!("{}\n", sentinel.print_command());
        assert!(!sentinel.pattern().matches(&echo_only));

        let with_result = format!("{}\n{}\n", sentinel.print_command(), sentinel.token());
        assert!(sentinel.pattern().matches(&with_result));
        assert!(contains_unquoted(&with_result, sentinel.token()));
    }

    #[test]
    fn token_is_uppercase_alphanumeric() {
        let sentinel = Sentinel::generate("anything");
        assert!(
            sentinel
                .token()
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }
}
