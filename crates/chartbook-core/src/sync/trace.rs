//! Bounded in-memory diagnostic trace of sync activity.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

const DEFAULT_CAPACITY: usize = 128;

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Ring buffer of recent sync events, kept separate from `tracing` so a CLI
/// can print what the last cycle actually did without a collector running.
pub struct SyncTrace {
    entries: Mutex<VecDeque<TraceEntry>>,
    capacity: usize,
}

impl SyncTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn record(&self, message: impl Into<String>) {
        let entry = TraceEntry {
            at: Utc::now(),
            message: message.into(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Snapshot the buffer, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for SyncTrace {
    fn default() -> Self {
        Self::new()
    }
}
