//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

fn record_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: catalog tables, outbox, conflicts, sync state
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artist TEXT,
            default_key TEXT,
            tempo_bpm INTEGER,
            remote_rev INTEGER,
            dirty INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_songs_dirty ON songs(dirty);

        CREATE TABLE IF NOT EXISTS song_versions (
            id TEXT PRIMARY KEY,
            song_id TEXT NOT NULL,
            name TEXT NOT NULL,
            key TEXT,
            capo INTEGER,
            body TEXT NOT NULL,
            remote_rev INTEGER,
            dirty INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_song_versions_song ON song_versions(song_id);
        CREATE INDEX IF NOT EXISTS idx_song_versions_dirty ON song_versions(dirty);

        CREATE TABLE IF NOT EXISTS section_notes (
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            section TEXT NOT NULL,
            body TEXT NOT NULL,
            remote_rev INTEGER,
            dirty INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_section_notes_version ON section_notes(version_id);
        CREATE INDEX IF NOT EXISTS idx_section_notes_dirty ON section_notes(dirty);

        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            op TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            base_rev INTEGER,
            payload TEXT,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            error_message TEXT,
            sent_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status);
        CREATE INDEX IF NOT EXISTS idx_outbox_entity ON outbox(entity_type, entity_id);

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_snapshot TEXT NOT NULL,
            remote_snapshot TEXT,
            created_at TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity
            ON sync_conflicts(entity_type, entity_id, resolved);

        CREATE TABLE IF NOT EXISTS sync_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_cursor TEXT,
            last_sync_at TEXT,
            last_push_at TEXT,
            last_pull_at TEXT,
            last_error TEXT,
            last_server_time TEXT,
            last_apply_summary TEXT,
            last_sync_id TEXT,
            last_sync_source TEXT,
            last_sync_mode TEXT,
            owner_uid TEXT
        );
        ",
    )?;

    record_version(conn, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
