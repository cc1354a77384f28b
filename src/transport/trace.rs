//! Optional diagnostic trace sink for transport traffic.
//!
//! Enabled by `KAPCOM_TRACE=1`. Writes one line per send/receive event
//! (direction, byte length, short content hash, content) to a log file
//! under `~/.kapcom/logs/`. When disabled this is a no-op and must not
//! affect protocol behavior in any way.

use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::Write;

pub struct TraceSink {
    file: Option<File>,
}

impl TraceSink {
    /// Build a sink from the environment. Any failure to open the trace
    /// file silently disables tracing; diagnostics never break the protocol.
    pub fn from_env() -> Self {
        let enabled = std::env::var("KAPCOM_TRACE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !enabled {
            return Self { file: None };
        }

        let file = crate::config::logs_dir().ok().and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            let path = dir.join(format!("trace-{}.log", std::process::id()));
            OpenOptions::new().create(true).append(true).open(path).ok()
        });
        Self { file }
    }

    pub fn enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Record one traffic event. `direction` is "send" or "recv".
    pub fn record(&mut self, direction: &str, content: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let text = String::from_utf8_lossy(content);
        let line = format!(
            "{} {} len={} hash={} {:?}\n",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            direction,
            content.len(),
            short_hash(&text),
            text,
        );
        let _ = file.write_all(line.as_bytes());
    }
}

/// Short content hash used to correlate trace lines without quoting noise.
pub fn short_hash(content: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}
