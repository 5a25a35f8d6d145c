//! Persisted sync state singleton

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide sync bookkeeping, persisted as a single row.
///
/// `last_cursor` is the opaque server-issued pull cursor; it only moves
/// forward, except via an explicit force-full-resync which resets it to the
/// origin. The remaining fields are diagnostics surfaced by status views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Opaque pull cursor; `None` means "from the origin"
    pub last_cursor: Option<String>,
    /// End of the last fully successful cycle
    pub last_sync_at: Option<DateTime<Utc>>,
    /// End of the last push phase that ran
    pub last_push_at: Option<DateTime<Utc>>,
    /// End of the last pull phase that ran
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Message from the last failed cycle; cleared on success
    pub last_error: Option<String>,
    /// Server clock as of the last pull response, when reported
    pub last_server_time: Option<DateTime<Utc>>,
    /// Human-readable summary of the last cycle ("pushed=2 pulled=7")
    pub last_apply_summary: Option<String>,
    /// Unique id of the last cycle that ran, successful or not
    pub last_sync_id: Option<String>,
    /// Device that ran the last cycle
    pub last_sync_source: Option<String>,
    /// How the last cycle was triggered ("manual", "forced", "scheduled")
    pub last_sync_mode: Option<String>,
    /// Account the local data belongs to
    pub owner_uid: Option<String>,
}

impl SyncState {
    /// Record a fully successful cycle
    pub fn record_success(&mut self, pushed: u64, pulled: u64) {
        let now = Utc::now();
        self.last_sync_at = Some(now);
        self.last_error = None;
        self.last_apply_summary = Some(format!("pushed={pushed} pulled={pulled}"));
    }

    /// Record a failed cycle
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Stamp which cycle is being recorded, successful or not
    pub fn record_cycle(
        &mut self,
        sync_id: impl Into<String>,
        source: impl Into<String>,
        mode: impl Into<String>,
    ) {
        self.last_sync_id = Some(sync_id.into());
        self.last_sync_source = Some(source.into());
        self.last_sync_mode = Some(mode.into());
    }
}
