//! Bounded in-memory log for user-facing diagnostics.
//!
//! Everything important also goes through `tracing`; this buffer is the
//! cheap, always-available tail that `VoiceSystem::logs(count)` serves to
//! the host app's diagnostics screen. Entries are timestamped
//! `YYYY-MM-DD HH:MM:SS` and evicted oldest-first past [`LOG_CAPACITY`].

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum retained log entries.
pub const LOG_CAPACITY: usize = 200;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Routine lifecycle and dispatch events.
    Info,
    /// Recoverable problems (transient errors, retries).
    Warn,
    /// Failures that needed intervention or were dropped.
    Error,
}

/// One diagnostics log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Wall-clock timestamp, `YYYY-MM-DD HH:MM:SS` (UTC).
    pub timestamp: String,
    /// Entry severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
}

/// Bounded FIFO of recent log entries.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest once full.
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: current_timestamp_str(),
            level,
            message: message.into(),
        });
    }

    /// The most recent `count` entries, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries. Called on shutdown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A log buffer shared between the lifecycle manager and dispatch engine.
pub type SharedLogBuffer = Arc<Mutex<LogBuffer>>;

/// Create a fresh shared log buffer.
#[must_use]
pub fn shared() -> SharedLogBuffer {
    Arc::new(Mutex::new(LogBuffer::new()))
}

/// Push to a shared buffer, tolerating a poisoned lock.
pub fn log_to(buffer: &SharedLogBuffer, level: LogLevel, message: impl Into<String>) {
    let mut guard = match buffer.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    guard.push(level, message);
}

/// Initialise `tracing` output with an env-filter, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Return a formatted timestamp string for log lines: `YYYY-MM-DD HH:MM:SS`.
fn current_timestamp_str() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let time_of_day = secs % 86_400;
    let hour = time_of_day / 3_600;
    let minute = (time_of_day % 3_600) / 60;
    let second = time_of_day % 60;
    let (y, m, d) = days_to_ymd(secs / 86_400);
    format!("{y:04}-{m:02}-{d:02} {hour:02}:{minute:02}:{second:02}")
}

/// Convert days since Unix epoch to (year, month, day).
///
/// Uses Howard Hinnant's `civil_from_days` algorithm.
fn days_to_ymd(days: u64) -> (u64, u64, u64) {
    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as u64, m, d)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn push_and_recent_preserve_order() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogLevel::Info, "first");
        buffer.push(LogLevel::Warn, "second");
        buffer.push(LogLevel::Error, "third");

        let recent = buffer.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "third");
    }

    #[test]
    fn recent_with_large_count_returns_all() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogLevel::Info, "only");
        assert_eq!(buffer.recent(100).len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut buffer = LogBuffer::new();
        for i in 0..(LOG_CAPACITY + 5) {
            buffer.push(LogLevel::Info, format!("entry {i}"));
        }
        assert_eq!(buffer.len(), LOG_CAPACITY);
        assert_eq!(buffer.recent(1)[0].message, format!("entry {}", LOG_CAPACITY + 4));
        assert_eq!(buffer.recent(LOG_CAPACITY)[0].message, "entry 5");
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogLevel::Info, "x");
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn timestamp_has_expected_format() {
        let ts = current_timestamp_str();
        assert_eq!(ts.len(), 19, "unexpected timestamp length: {ts}");
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[7..8], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    #[test]
    fn days_to_ymd_epoch_is_1970_01_01() {
        assert_eq!(days_to_ymd(0), (1970, 1, 1));
    }

    #[test]
    fn days_to_ymd_known_date() {
        // 2024-01-01 is day 19723.
        assert_eq!(days_to_ymd(19_723), (2024, 1, 1));
    }

    #[test]
    fn shared_buffer_visible_across_clones() {
        let buffer = shared();
        let clone = Arc::clone(&buffer);
        log_to(&buffer, LogLevel::Info, "hello");
        assert_eq!(clone.lock().unwrap().len(), 1);
    }

    #[test]
    fn entry_serializes_to_json() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogLevel::Warn, "retrying");
        let json = serde_json::to_string(&buffer.recent(1)[0]).unwrap();
        assert!(json.contains("\"level\":\"warn\""));
        assert!(json.contains("retrying"));
    }
}
