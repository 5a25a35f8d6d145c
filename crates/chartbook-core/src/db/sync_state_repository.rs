//! Sync state repository implementation

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::SyncState;
use crate::util::{format_ts, parse_ts};

/// Trait for the persisted sync-state singleton
pub trait SyncStateRepository {
    /// Load the singleton, or defaults when no cycle has run yet
    fn load(&self) -> Result<SyncState>;

    /// Persist the singleton (insert-or-replace)
    fn save(&self, state: &SyncState) -> Result<()>;

    /// Drop the singleton (only used by explicit clear-local-data)
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn load(&self) -> Result<SyncState> {
        let mut stmt = self.conn.prepare(
            "SELECT last_cursor, last_sync_at, last_push_at, last_pull_at, last_error,
                    last_server_time, last_apply_summary, last_sync_id, last_sync_source,
                    last_sync_mode, owner_uid
             FROM sync_state WHERE id = 1",
        )?;
        let mut rows = stmt.query([])?;

        let Some(row) = rows.next()? else {
            return Ok(SyncState::default());
        };

        let parse_opt = |raw: Option<String>| raw.as_deref().map(parse_ts).transpose();

        Ok(SyncState {
            last_cursor: row.get(0)?,
            last_sync_at: parse_opt(row.get(1)?)?,
            last_push_at: parse_opt(row.get(2)?)?,
            last_pull_at: parse_opt(row.get(3)?)?,
            last_error: row.get(4)?,
            last_server_time: parse_opt(row.get(5)?)?,
            last_apply_summary: row.get(6)?,
            last_sync_id: row.get(7)?,
            last_sync_source: row.get(8)?,
            last_sync_mode: row.get(9)?,
            owner_uid: row.get(10)?,
        })
    }

    fn save(&self, state: &SyncState) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state
             (id, last_cursor, last_sync_at, last_push_at, last_pull_at, last_error,
              last_server_time, last_apply_summary, last_sync_id, last_sync_source,
              last_sync_mode, owner_uid)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                state.last_cursor,
                state.last_sync_at.as_ref().map(format_ts),
                state.last_push_at.as_ref().map(format_ts),
                state.last_pull_at.as_ref().map(format_ts),
                state.last_error,
                state.last_server_time.as_ref().map(format_ts),
                state.last_apply_summary,
                state.last_sync_id,
                state.last_sync_source,
                state.last_sync_mode,
                state.owner_uid,
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_state WHERE id = 1", [])?;
        Ok(())
    }
}
