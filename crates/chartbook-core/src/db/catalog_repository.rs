//! Catalog repository: songs, chart versions, and section notes.
//!
//! Every local mutation writes the entity row and appends the matching
//! outbox item inside one transaction, so queue and entity can never diverge
//! after a crash. Remote-apply operations used by the pull phase live here
//! too, because the dirty-guard check and the conflict snapshot must share a
//! transaction with the write they guard.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    ConflictRemote, EntityType, OutboxItem, OutboxOp, SectionNote, SectionNoteId, Song, SongId,
    SongVersion, SyncConflict, VersionId,
};
use crate::util::{format_ts, parse_ts};

use super::conflict_repository::{ConflictRepository, SqliteConflictRepository};
use super::outbox_repository::{OutboxRepository, SqliteOutboxRepository};

/// Outcome of applying one remote change to the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteApply {
    /// Change written (or tombstone removed) locally
    Applied,
    /// Local copy is dirty; change redirected into the conflict store
    Conflicted(SyncConflict),
    /// Nothing to do (e.g. delete of an already-absent entity)
    Unchanged,
}

/// Trait for catalog storage operations
pub trait CatalogRepository {
    // Songs
    fn insert_song(&self, song: &Song, device_id: &str) -> Result<()>;
    fn get_song(&self, id: &SongId) -> Result<Option<Song>>;
    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>>;
    fn update_song(&self, song: &Song, device_id: &str) -> Result<Song>;
    fn delete_song(&self, id: &SongId, device_id: &str) -> Result<()>;

    // Chart versions
    fn insert_version(&self, version: &SongVersion, device_id: &str) -> Result<()>;
    fn get_version(&self, id: &VersionId) -> Result<Option<SongVersion>>;
    fn list_versions(&self, song_id: &SongId) -> Result<Vec<SongVersion>>;
    fn update_version(&self, version: &SongVersion, device_id: &str) -> Result<SongVersion>;
    fn delete_version(&self, id: &VersionId, device_id: &str) -> Result<()>;

    // Section notes
    fn insert_note(&self, note: &SectionNote, device_id: &str) -> Result<()>;
    fn get_note(&self, id: &SectionNoteId) -> Result<Option<SectionNote>>;
    fn list_notes(&self, version_id: &VersionId) -> Result<Vec<SectionNote>>;
    fn update_note(&self, note: &SectionNote, device_id: &str) -> Result<SectionNote>;
    fn delete_note(&self, id: &SectionNoteId, device_id: &str) -> Result<()>;

    /// Resolve an ID prefix to candidate full IDs (CLI convenience)
    fn ids_by_prefix(
        &self,
        entity_type: EntityType,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>>;

    // Sync-engine operations
    /// Raw entity snapshot including tombstones, for conflict records
    fn entity_snapshot(&self, entity_type: EntityType, entity_id: Uuid)
        -> Result<Option<serde_json::Value>>;

    /// Apply an APPLIED push result: delete the outbox row, advance the
    /// entity revision, and clear `dirty` when no other open outbox item
    /// still references the entity. Returns false when the outbox row was
    /// already gone (replayed result), in which case nothing changes.
    fn acknowledge_applied(&self, item: &OutboxItem, new_rev: i64) -> Result<bool>;

    /// Mark an outbox item CONFLICT and record a conflict from the current
    /// local snapshot (remote side unknown until a later pull supplies it).
    fn record_push_conflict(&self, item: &OutboxItem) -> Result<SyncConflict>;

    /// Apply a remote UPSERT unless the local copy is dirty
    fn apply_remote_upsert(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
        payload: &serde_json::Value,
    ) -> Result<RemoteApply>;

    /// Apply a remote DELETE unless the local copy is dirty
    fn apply_remote_delete(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
    ) -> Result<RemoteApply>;

    /// Resolve a conflict by keeping the local copy: drop the entity's stale
    /// queue entries, re-enqueue the current local state against the remote
    /// revision, and close the conflict.
    fn resolve_keep_local(&self, conflict: &SyncConflict, device_id: &str) -> Result<()>;

    /// Resolve a conflict by taking the remote copy: overwrite (or remove)
    /// the local row, drop the entity's queue entries, and close the
    /// conflict. Fails when the remote side is still the push-time
    /// placeholder; a pull has to fill it in first.
    fn resolve_accept_remote(&self, conflict: &SyncConflict) -> Result<()>;

    /// Remove clean synced rows (force full resync). Dirty rows and the
    /// outbox survive so unsent edits are never lost.
    fn purge_clean_synced(&self) -> Result<usize>;
}

/// `SQLite` implementation of `CatalogRepository`
pub struct SqliteCatalogRepository<'a> {
    conn: &'a Connection,
}

const fn table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Song => "songs",
        EntityType::SongVersion => "song_versions",
        EntityType::SectionNote => "section_notes",
    }
}

impl<'a> SqliteCatalogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_song(row: &Row<'_>) -> Result<Song> {
        let id: String = row.get(0)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;
        Ok(Song {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid song id: {id}")))?,
            title: row.get(1)?,
            artist: row.get(2)?,
            default_key: row.get(3)?,
            tempo_bpm: row.get::<_, Option<i64>>(4)?.map(|bpm| bpm as u32),
            remote_rev: row.get(5)?,
            dirty: row.get::<_, i32>(6)? != 0,
            deleted: row.get::<_, i32>(7)? != 0,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn parse_version(row: &Row<'_>) -> Result<SongVersion> {
        let id: String = row.get(0)?;
        let song_id: String = row.get(1)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        Ok(SongVersion {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid version id: {id}")))?,
            song_id: song_id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid song id: {song_id}")))?,
            name: row.get(2)?,
            key: row.get(3)?,
            capo: row.get::<_, Option<i64>>(4)?.map(|capo| capo as u8),
            body: row.get(5)?,
            remote_rev: row.get(6)?,
            dirty: row.get::<_, i32>(7)? != 0,
            deleted: row.get::<_, i32>(8)? != 0,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn parse_note(row: &Row<'_>) -> Result<SectionNote> {
        let id: String = row.get(0)?;
        let version_id: String = row.get(1)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(SectionNote {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid note id: {id}")))?,
            version_id: version_id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid version id: {version_id}")))?,
            section: row.get(2)?,
            body: row.get(3)?,
            remote_rev: row.get(4)?,
            dirty: row.get::<_, i32>(5)? != 0,
            deleted: row.get::<_, i32>(6)? != 0,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    /// Fetch a row including tombstones, as a serialized snapshot
    fn fetch_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Option<serde_json::Value>> {
        let id = entity_id.to_string();
        let snapshot = match entity_type {
            EntityType::Song => self
                .fetch_song_any(&id)?
                .map(|song| serde_json::to_value(&song))
                .transpose()?,
            EntityType::SongVersion => self
                .fetch_version_any(&id)?
                .map(|version| serde_json::to_value(&version))
                .transpose()?,
            EntityType::SectionNote => self
                .fetch_note_any(&id)?
                .map(|note| serde_json::to_value(&note))
                .transpose()?,
        };
        Ok(snapshot)
    }

    fn fetch_song_any(&self, id: &str) -> Result<Option<Song>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, default_key, tempo_bpm, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM songs WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        rows.next()?.map(Self::parse_song).transpose()
    }

    fn fetch_version_any(&self, id: &str) -> Result<Option<SongVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, name, key, capo, body, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM song_versions WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        rows.next()?.map(Self::parse_version).transpose()
    }

    fn fetch_note_any(&self, id: &str) -> Result<Option<SectionNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, version_id, section, body, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM section_notes WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        rows.next()?.map(Self::parse_note).transpose()
    }

    fn dirty_flag(&self, entity_type: EntityType, entity_id: Uuid) -> Result<Option<bool>> {
        let sql = format!(
            "SELECT dirty FROM {} WHERE id = ?",
            table(entity_type)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![entity_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, i32>(0)? != 0)),
            None => Ok(None),
        }
    }

    fn write_song_row(&self, song: &Song) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO songs
             (id, title, artist, default_key, tempo_bpm, remote_rev, dirty, deleted,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                song.id.as_str(),
                song.title,
                song.artist,
                song.default_key,
                song.tempo_bpm.map(i64::from),
                song.remote_rev,
                i32::from(song.dirty),
                i32::from(song.deleted),
                format_ts(&song.created_at),
                format_ts(&song.updated_at),
            ],
        )?;
        Ok(())
    }

    fn write_version_row(&self, version: &SongVersion) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO song_versions
             (id, song_id, name, key, capo, body, remote_rev, dirty, deleted,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                version.id.as_str(),
                version.song_id.as_str(),
                version.name,
                version.key,
                version.capo.map(i64::from),
                version.body,
                version.remote_rev,
                i32::from(version.dirty),
                i32::from(version.deleted),
                format_ts(&version.created_at),
                format_ts(&version.updated_at),
            ],
        )?;
        Ok(())
    }

    fn write_note_row(&self, note: &SectionNote) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO section_notes
             (id, version_id, section, body, remote_rev, dirty, deleted,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                note.id.as_str(),
                note.version_id.as_str(),
                note.section,
                note.body,
                note.remote_rev,
                i32::from(note.dirty),
                i32::from(note.deleted),
                format_ts(&note.created_at),
                format_ts(&note.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Write an entity plus its outbox item in one transaction
    fn upsert_with_outbox(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        base_rev: Option<i64>,
        payload: serde_json::Value,
        device_id: &str,
        write: impl FnOnce(&Self) -> Result<()>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        write(self)?;
        let outbox = SqliteOutboxRepository::new(self.conn);
        outbox.add(&OutboxItem::new(
            device_id,
            entity_type,
            OutboxOp::Upsert,
            entity_id,
            base_rev,
            Some(payload),
        ))?;
        tx.commit()?;
        Ok(())
    }

    /// Soft-delete a synced entity (tombstone + DELETE outbox item) or
    /// hard-delete a local-only one, dropping its queued mutations.
    fn delete_with_outbox(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        remote_rev: Option<i64>,
        device_id: &str,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let outbox = SqliteOutboxRepository::new(self.conn);

        if let Some(base_rev) = remote_rev {
            let now = format_ts(&Utc::now());
            self.conn.execute(
                &format!(
                    "UPDATE {} SET deleted = 1, dirty = 1, updated_at = ? WHERE id = ?",
                    table(entity_type)
                ),
                params![now, entity_id.to_string()],
            )?;
            outbox.add(&OutboxItem::new(
                device_id,
                entity_type,
                OutboxOp::Delete,
                entity_id,
                Some(base_rev),
                None,
            ))?;
        } else {
            // The server never saw this entity; queued mutations for it are
            // pointless and would resurrect it on push.
            self.conn.execute(
                &format!("DELETE FROM {} WHERE id = ?", table(entity_type)),
                params![entity_id.to_string()],
            )?;
            outbox.delete_for_entity(entity_type, entity_id)?;
        }

        tx.commit()?;
        Ok(())
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn insert_song(&self, song: &Song, device_id: &str) -> Result<()> {
        let payload = serde_json::to_value(song)?;
        self.upsert_with_outbox(
            EntityType::Song,
            song.id.as_uuid(),
            song.remote_rev,
            payload,
            device_id,
            |repo| repo.write_song_row(song),
        )
    }

    fn get_song(&self, id: &SongId) -> Result<Option<Song>> {
        Ok(self
            .fetch_song_any(&id.as_str())?
            .filter(|song| !song.deleted))
    }

    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, default_key, tempo_bpm, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM songs
             WHERE deleted = 0
             ORDER BY title COLLATE NOCASE, id
             LIMIT ? OFFSET ?",
        )?;
        let mut rows = stmt.query(params![limit as i64, offset as i64])?;
        let mut songs = Vec::new();
        while let Some(row) = rows.next()? {
            songs.push(Self::parse_song(row)?);
        }
        Ok(songs)
    }

    fn update_song(&self, song: &Song, device_id: &str) -> Result<Song> {
        if self.get_song(&song.id)?.is_none() {
            return Err(Error::NotFound(song.id.to_string()));
        }
        let updated = Song {
            dirty: true,
            updated_at: Utc::now(),
            ..song.clone()
        };
        let payload = serde_json::to_value(&updated)?;
        self.upsert_with_outbox(
            EntityType::Song,
            updated.id.as_uuid(),
            updated.remote_rev,
            payload,
            device_id,
            |repo| repo.write_song_row(&updated),
        )?;
        Ok(updated)
    }

    fn delete_song(&self, id: &SongId, device_id: &str) -> Result<()> {
        let song = self
            .get_song(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.delete_with_outbox(EntityType::Song, id.as_uuid(), song.remote_rev, device_id)
    }

    fn insert_version(&self, version: &SongVersion, device_id: &str) -> Result<()> {
        let payload = serde_json::to_value(version)?;
        self.upsert_with_outbox(
            EntityType::SongVersion,
            version.id.as_uuid(),
            version.remote_rev,
            payload,
            device_id,
            |repo| repo.write_version_row(version),
        )
    }

    fn get_version(&self, id: &VersionId) -> Result<Option<SongVersion>> {
        Ok(self
            .fetch_version_any(&id.as_str())?
            .filter(|version| !version.deleted))
    }

    fn list_versions(&self, song_id: &SongId) -> Result<Vec<SongVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, name, key, capo, body, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM song_versions
             WHERE song_id = ? AND deleted = 0
             ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![song_id.as_str()])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(Self::parse_version(row)?);
        }
        Ok(versions)
    }

    fn update_version(&self, version: &SongVersion, device_id: &str) -> Result<SongVersion> {
        if self.get_version(&version.id)?.is_none() {
            return Err(Error::NotFound(version.id.to_string()));
        }
        let updated = SongVersion {
            dirty: true,
            updated_at: Utc::now(),
            ..version.clone()
        };
        let payload = serde_json::to_value(&updated)?;
        self.upsert_with_outbox(
            EntityType::SongVersion,
            updated.id.as_uuid(),
            updated.remote_rev,
            payload,
            device_id,
            |repo| repo.write_version_row(&updated),
        )?;
        Ok(updated)
    }

    fn delete_version(&self, id: &VersionId, device_id: &str) -> Result<()> {
        let version = self
            .get_version(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.delete_with_outbox(
            EntityType::SongVersion,
            id.as_uuid(),
            version.remote_rev,
            device_id,
        )
    }

    fn insert_note(&self, note: &SectionNote, device_id: &str) -> Result<()> {
        let payload = serde_json::to_value(note)?;
        self.upsert_with_outbox(
            EntityType::SectionNote,
            note.id.as_uuid(),
            note.remote_rev,
            payload,
            device_id,
            |repo| repo.write_note_row(note),
        )
    }

    fn get_note(&self, id: &SectionNoteId) -> Result<Option<SectionNote>> {
        Ok(self
            .fetch_note_any(&id.as_str())?
            .filter(|note| !note.deleted))
    }

    fn list_notes(&self, version_id: &VersionId) -> Result<Vec<SectionNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, version_id, section, body, remote_rev, dirty, deleted,
                    created_at, updated_at
             FROM section_notes
             WHERE version_id = ? AND deleted = 0
             ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![version_id.as_str()])?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(Self::parse_note(row)?);
        }
        Ok(notes)
    }

    fn update_note(&self, note: &SectionNote, device_id: &str) -> Result<SectionNote> {
        if self.get_note(&note.id)?.is_none() {
            return Err(Error::NotFound(note.id.to_string()));
        }
        let updated = SectionNote {
            dirty: true,
            updated_at: Utc::now(),
            ..note.clone()
        };
        let payload = serde_json::to_value(&updated)?;
        self.upsert_with_outbox(
            EntityType::SectionNote,
            updated.id.as_uuid(),
            updated.remote_rev,
            payload,
            device_id,
            |repo| repo.write_note_row(&updated),
        )?;
        Ok(updated)
    }

    fn delete_note(&self, id: &SectionNoteId, device_id: &str) -> Result<()> {
        let note = self
            .get_note(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.delete_with_outbox(
            EntityType::SectionNote,
            id.as_uuid(),
            note.remote_rev,
            device_id,
        )
    }

    fn ids_by_prefix(
        &self,
        entity_type: EntityType,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT id FROM {} WHERE id LIKE ? AND deleted = 0 ORDER BY id LIMIT ?",
            table(entity_type)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pattern = format!("{}%", prefix.replace(['%', '_'], ""));
        let mut rows = stmt.query(params![pattern, limit as i64])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn entity_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Option<serde_json::Value>> {
        self.fetch_snapshot(entity_type, entity_id)
    }

    fn acknowledge_applied(&self, item: &OutboxItem, new_rev: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let outbox = SqliteOutboxRepository::new(self.conn);

        if !outbox.acknowledge(&item.id)? {
            // Replayed result; the first application already advanced the rev
            return Ok(false);
        }

        let still_open = outbox.has_open_items_for(item.entity_type, item.entity_id)?;
        let sql = if still_open {
            format!(
                "UPDATE {} SET remote_rev = ? WHERE id = ?",
                table(item.entity_type)
            )
        } else {
            format!(
                "UPDATE {} SET remote_rev = ?, dirty = 0 WHERE id = ?",
                table(item.entity_type)
            )
        };
        self.conn
            .execute(&sql, params![new_rev, item.entity_id.to_string()])?;

        // Acknowledged DELETE of a tombstone: the server now knows, so the
        // local row can finally go.
        if item.op == OutboxOp::Delete && !still_open {
            self.conn.execute(
                &format!(
                    "DELETE FROM {} WHERE id = ? AND deleted = 1",
                    table(item.entity_type)
                ),
                params![item.entity_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn record_push_conflict(&self, item: &OutboxItem) -> Result<SyncConflict> {
        let tx = self.conn.unchecked_transaction()?;
        let outbox = SqliteOutboxRepository::new(self.conn);
        let conflicts = SqliteConflictRepository::new(self.conn);

        outbox.mark_conflict(&item.id)?;
        let local = self
            .fetch_snapshot(item.entity_type, item.entity_id)?
            .unwrap_or(serde_json::Value::Null);
        let conflict = conflicts.create(item.entity_type, item.entity_id, local, None)?;

        tx.commit()?;
        Ok(conflict)
    }

    fn apply_remote_upsert(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
        payload: &serde_json::Value,
    ) -> Result<RemoteApply> {
        let tx = self.conn.unchecked_transaction()?;

        if self.dirty_flag(entity_type, entity_id)? == Some(true) {
            let local = self
                .fetch_snapshot(entity_type, entity_id)?
                .unwrap_or(serde_json::Value::Null);
            let conflicts = SqliteConflictRepository::new(self.conn);
            let conflict = conflicts.create(
                entity_type,
                entity_id,
                local,
                Some(ConflictRemote::Upsert {
                    rev,
                    entity: payload.clone(),
                }),
            )?;
            tx.commit()?;
            return Ok(RemoteApply::Conflicted(conflict));
        }

        match entity_type {
            EntityType::Song => {
                let song = Song {
                    remote_rev: Some(rev),
                    dirty: false,
                    deleted: false,
                    ..serde_json::from_value(payload.clone())?
                };
                self.write_song_row(&song)?;
            }
            EntityType::SongVersion => {
                let version = SongVersion {
                    remote_rev: Some(rev),
                    dirty: false,
                    deleted: false,
                    ..serde_json::from_value(payload.clone())?
                };
                self.write_version_row(&version)?;
            }
            EntityType::SectionNote => {
                let note = SectionNote {
                    remote_rev: Some(rev),
                    dirty: false,
                    deleted: false,
                    ..serde_json::from_value(payload.clone())?
                };
                self.write_note_row(&note)?;
            }
        }

        tx.commit()?;
        Ok(RemoteApply::Applied)
    }

    fn apply_remote_delete(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
    ) -> Result<RemoteApply> {
        let tx = self.conn.unchecked_transaction()?;

        match self.dirty_flag(entity_type, entity_id)? {
            None => {
                // Already absent; replaying the same pull page is a no-op
                tx.commit()?;
                Ok(RemoteApply::Unchanged)
            }
            Some(true) => {
                let local = self
                    .fetch_snapshot(entity_type, entity_id)?
                    .unwrap_or(serde_json::Value::Null);
                let conflicts = SqliteConflictRepository::new(self.conn);
                let conflict = conflicts.create(
                    entity_type,
                    entity_id,
                    local,
                    Some(ConflictRemote::Delete { rev }),
                )?;
                tx.commit()?;
                Ok(RemoteApply::Conflicted(conflict))
            }
            Some(false) => {
                self.conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?", table(entity_type)),
                    params![entity_id.to_string()],
                )?;
                tx.commit()?;
                Ok(RemoteApply::Applied)
            }
        }
    }

    fn resolve_keep_local(&self, conflict: &SyncConflict, device_id: &str) -> Result<()> {
        if conflict.resolved {
            return Err(Error::InvalidInput(format!(
                "Conflict {} is already resolved",
                conflict.id
            )));
        }

        let tx = self.conn.unchecked_transaction()?;

        let snapshot = self
            .fetch_snapshot(conflict.entity_type, conflict.entity_id)?
            .ok_or_else(|| Error::NotFound(conflict.entity_id.to_string()))?;

        let base_rev = match &conflict.remote_snapshot {
            Some(ConflictRemote::Upsert { rev, .. } | ConflictRemote::Delete { rev }) => Some(*rev),
            None => self.conn.query_row(
                &format!(
                    "SELECT remote_rev FROM {} WHERE id = ?",
                    table(conflict.entity_type)
                ),
                params![conflict.entity_id.to_string()],
                |row| row.get(0),
            )?,
        };

        // Rebase the local copy onto the revision the server reported so the
        // re-push carries a base the server will accept.
        self.conn.execute(
            &format!(
                "UPDATE {} SET remote_rev = ?, dirty = 1 WHERE id = ?",
                table(conflict.entity_type)
            ),
            params![base_rev, conflict.entity_id.to_string()],
        )?;

        let outbox = SqliteOutboxRepository::new(self.conn);
        outbox.delete_for_entity(conflict.entity_type, conflict.entity_id)?;
        outbox.add(&OutboxItem::new(
            device_id,
            conflict.entity_type,
            OutboxOp::Upsert,
            conflict.entity_id,
            base_rev,
            Some(snapshot),
        ))?;

        SqliteConflictRepository::new(self.conn).resolve(&conflict.id)?;
        tx.commit()?;
        Ok(())
    }

    fn resolve_accept_remote(&self, conflict: &SyncConflict) -> Result<()> {
        if conflict.resolved {
            return Err(Error::InvalidInput(format!(
                "Conflict {} is already resolved",
                conflict.id
            )));
        }

        let tx = self.conn.unchecked_transaction()?;

        match &conflict.remote_snapshot {
            None => {
                return Err(Error::InvalidInput(
                    "Remote side of this conflict is not known yet; sync to fetch it".to_string(),
                ));
            }
            Some(ConflictRemote::Delete { .. }) => {
                self.conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?", table(conflict.entity_type)),
                    params![conflict.entity_id.to_string()],
                )?;
            }
            Some(ConflictRemote::Upsert { rev, entity }) => match conflict.entity_type {
                EntityType::Song => {
                    let song = Song {
                        remote_rev: Some(*rev),
                        dirty: false,
                        deleted: false,
                        ..serde_json::from_value(entity.clone())?
                    };
                    self.write_song_row(&song)?;
                }
                EntityType::SongVersion => {
                    let version = SongVersion {
                        remote_rev: Some(*rev),
                        dirty: false,
                        deleted: false,
                        ..serde_json::from_value(entity.clone())?
                    };
                    self.write_version_row(&version)?;
                }
                EntityType::SectionNote => {
                    let note = SectionNote {
                        remote_rev: Some(*rev),
                        dirty: false,
                        deleted: false,
                        ..serde_json::from_value(entity.clone())?
                    };
                    self.write_note_row(&note)?;
                }
            },
        }

        SqliteOutboxRepository::new(self.conn)
            .delete_for_entity(conflict.entity_type, conflict.entity_id)?;
        SqliteConflictRepository::new(self.conn).resolve(&conflict.id)?;
        tx.commit()?;
        Ok(())
    }

    fn purge_clean_synced(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut purged = 0;
        for entity_type in EntityType::ALL {
            purged += self.conn.execute(
                &format!(
                    "DELETE FROM {} WHERE dirty = 0 AND remote_rev IS NOT NULL",
                    table(entity_type)
                ),
                [],
            )?;
        }
        tx.commit()?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::outbox_repository::{OutboxRepository, SqliteOutboxRepository};
    use crate::db::Database;
    use crate::models::OutboxStatus;
    use pretty_assertions::assert_eq;

    const DEVICE: &str = "device-a";

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn insert_song_enqueues_outbox_in_same_unit() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("Be Thou My Vision");
        repo.insert_song(&song, DEVICE).unwrap();

        let pending = outbox.get_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, song.id.as_uuid());
        assert_eq!(pending[0].op, OutboxOp::Upsert);
        assert_eq!(pending[0].base_rev, None);

        let fetched = repo.get_song(&song.id).unwrap().unwrap();
        assert!(fetched.dirty);
    }

    #[test]
    fn update_song_pins_base_rev() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let mut song = Song::new("Amazing Grace");
        song.remote_rev = Some(3);
        song.dirty = false;
        repo.insert_song(&song, DEVICE).unwrap();

        song.title = "Amazing Grace (retuned)".to_string();
        let updated = repo.update_song(&song, DEVICE).unwrap();
        assert!(updated.dirty);
        assert!(updated.updated_at >= song.updated_at);

        let pending = outbox.get_pending(10).unwrap();
        assert_eq!(pending.last().unwrap().base_rev, Some(3));
    }

    #[test]
    fn delete_local_only_song_is_hard_and_drops_queue() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("Scratch idea");
        repo.insert_song(&song, DEVICE).unwrap();
        repo.delete_song(&song.id, DEVICE).unwrap();

        assert!(repo.get_song(&song.id).unwrap().is_none());
        assert!(repo
            .entity_snapshot(EntityType::Song, song.id.as_uuid())
            .unwrap()
            .is_none());
        assert!(outbox.get_pending(10).unwrap().is_empty());
    }

    #[test]
    fn delete_synced_song_tombstones_and_enqueues() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let mut song = Song::new("10,000 Reasons");
        song.remote_rev = Some(7);
        song.dirty = false;
        repo.insert_song(&song, DEVICE).unwrap();

        repo.delete_song(&song.id, DEVICE).unwrap();

        // Hidden from reads but still present as a tombstone
        assert!(repo.get_song(&song.id).unwrap().is_none());
        let snapshot = repo
            .entity_snapshot(EntityType::Song, song.id.as_uuid())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot["deleted"], serde_json::json!(true));

        let pending = outbox.get_pending(10).unwrap();
        let delete = pending
            .iter()
            .find(|item| item.op == OutboxOp::Delete)
            .unwrap();
        assert_eq!(delete.base_rev, Some(7));
    }

    #[test]
    fn acknowledge_applied_advances_rev_and_clears_dirty() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("Build My Life");
        repo.insert_song(&song, DEVICE).unwrap();
        let item = outbox.get_pending(1).unwrap().remove(0);

        assert!(repo.acknowledge_applied(&item, 1).unwrap());

        let synced = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(synced.remote_rev, Some(1));
        assert!(!synced.dirty);
        assert!(outbox.get_pending(10).unwrap().is_empty());

        // Replay is a no-op
        assert!(!repo.acknowledge_applied(&item, 1).unwrap());
        let unchanged = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(unchanged.remote_rev, Some(1));
    }

    #[test]
    fn acknowledge_keeps_dirty_while_newer_edit_is_queued() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let mut song = Song::new("Cornerstone");
        repo.insert_song(&song, DEVICE).unwrap();
        song.title = "Cornerstone (live)".to_string();
        repo.update_song(&song, DEVICE).unwrap();

        let first = outbox.get_pending(1).unwrap().remove(0);
        assert!(repo.acknowledge_applied(&first, 1).unwrap());

        // The second queued edit still makes the row dirty
        let fetched = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(fetched.remote_rev, Some(1));
        assert!(fetched.dirty);
    }

    #[test]
    fn acknowledged_delete_removes_the_tombstone() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let mut song = Song::new("Oceans");
        song.remote_rev = Some(2);
        song.dirty = false;
        repo.insert_song(&song, DEVICE).unwrap();
        repo.delete_song(&song.id, DEVICE).unwrap();

        let pending = outbox.get_pending(10).unwrap();
        let delete = pending
            .iter()
            .find(|item| item.op == OutboxOp::Delete)
            .unwrap();
        assert!(repo.acknowledge_applied(delete, 3).unwrap());

        assert!(repo
            .entity_snapshot(EntityType::Song, song.id.as_uuid())
            .unwrap()
            .is_none());
    }

    #[test]
    fn record_push_conflict_marks_item_and_snapshots_local() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("King of Kings");
        repo.insert_song(&song, DEVICE).unwrap();
        let item = outbox.get_pending(1).unwrap().remove(0);

        let conflict = repo.record_push_conflict(&item).unwrap();
        assert!(conflict.remote_snapshot.is_none());
        assert_eq!(conflict.local_snapshot["title"], serde_json::json!("King of Kings"));

        let marked = outbox.get(&item.id).unwrap().unwrap();
        assert_eq!(marked.status, OutboxStatus::Conflict);
    }

    #[test]
    fn remote_upsert_applies_to_clean_rows() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        let incoming = Song {
            dirty: false,
            ..Song::new("Graves into Gardens")
        };
        let payload = serde_json::to_value(&incoming).unwrap();

        let outcome = repo
            .apply_remote_upsert(EntityType::Song, incoming.id.as_uuid(), 5, &payload)
            .unwrap();
        assert_eq!(outcome, RemoteApply::Applied);

        let stored = repo.get_song(&incoming.id).unwrap().unwrap();
        assert_eq!(stored.remote_rev, Some(5));
        assert!(!stored.dirty);
    }

    #[test]
    fn remote_upsert_on_dirty_row_yields_conflict() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        let song = Song::new("Firm Foundation");
        repo.insert_song(&song, DEVICE).unwrap();

        let remote = serde_json::json!({"id": song.id, "title": "Firm Foundation (He Won't)"});
        let outcome = repo
            .apply_remote_upsert(EntityType::Song, song.id.as_uuid(), 4, &remote)
            .unwrap();

        let RemoteApply::Conflicted(conflict) = outcome else {
            panic!("expected conflict, got {outcome:?}");
        };
        assert_eq!(
            conflict.remote_snapshot,
            Some(ConflictRemote::Upsert {
                rev: 4,
                entity: remote
            })
        );

        // Local copy untouched
        let local = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(local.title, "Firm Foundation");
        assert!(local.dirty);
    }

    #[test]
    fn remote_delete_semantics() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        // Clean row: removed
        let clean = Song {
            dirty: false,
            ..Song::new("Old chart")
        };
        let payload = serde_json::to_value(&clean).unwrap();
        repo.apply_remote_upsert(EntityType::Song, clean.id.as_uuid(), 1, &payload)
            .unwrap();
        assert_eq!(
            repo.apply_remote_delete(EntityType::Song, clean.id.as_uuid(), 2)
                .unwrap(),
            RemoteApply::Applied
        );

        // Replay of the same page: no-op
        assert_eq!(
            repo.apply_remote_delete(EntityType::Song, clean.id.as_uuid(), 2)
                .unwrap(),
            RemoteApply::Unchanged
        );

        // Dirty row: conflict with a delete marker
        let dirty = Song::new("Edited offline");
        repo.insert_song(&dirty, DEVICE).unwrap();
        let outcome = repo
            .apply_remote_delete(EntityType::Song, dirty.id.as_uuid(), 9)
            .unwrap();
        let RemoteApply::Conflicted(conflict) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(
            conflict.remote_snapshot,
            Some(ConflictRemote::Delete { rev: 9 })
        );
        assert!(repo.get_song(&dirty.id).unwrap().is_some());
    }

    #[test]
    fn purge_clean_synced_spares_dirty_rows() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        let clean = Song {
            dirty: false,
            ..Song::new("Synced chart")
        };
        let payload = serde_json::to_value(&clean).unwrap();
        repo.apply_remote_upsert(EntityType::Song, clean.id.as_uuid(), 1, &payload)
            .unwrap();

        let dirty = Song::new("Unsent chart");
        repo.insert_song(&dirty, DEVICE).unwrap();

        assert_eq!(repo.purge_clean_synced().unwrap(), 1);
        assert!(repo.get_song(&clean.id).unwrap().is_none());
        assert!(repo.get_song(&dirty.id).unwrap().is_some());
    }

    #[test]
    fn versions_and_notes_round_trip() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        let song = Song::new("Living Hope");
        repo.insert_song(&song, DEVICE).unwrap();

        let mut version = SongVersion::new(song.id, "Acoustic in G", "[G]Living [C]Hope");
        version.key = Some("G".to_string());
        version.capo = Some(2);
        repo.insert_version(&version, DEVICE).unwrap();

        let listed = repo.list_versions(&song.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].capo, Some(2));

        let note = SectionNote::new(version.id, "bridge", "half-time on first pass");
        repo.insert_note(&note, DEVICE).unwrap();
        let notes = repo.list_notes(&version.id).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].section, "bridge");

        repo.delete_note(&note.id, DEVICE).unwrap();
        assert!(repo.list_notes(&version.id).unwrap().is_empty());
    }

    #[test]
    fn ids_by_prefix_matches_catalog_rows() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());

        let song = Song::new("Yet Not I");
        repo.insert_song(&song, DEVICE).unwrap();

        let prefix: String = song.id.as_str().chars().take(8).collect();
        let ids = repo.ids_by_prefix(EntityType::Song, &prefix, 3).unwrap();
        assert_eq!(ids, vec![song.id.as_str()]);
    }

    #[test]
    fn keep_local_rebases_and_requeues() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("Holy Forever");
        repo.insert_song(&song, DEVICE).unwrap();

        let remote = serde_json::json!({"id": song.id, "title": "Holy Forever (alt)"});
        let RemoteApply::Conflicted(conflict) = repo
            .apply_remote_upsert(EntityType::Song, song.id.as_uuid(), 6, &remote)
            .unwrap()
        else {
            panic!("expected conflict");
        };

        repo.resolve_keep_local(&conflict, DEVICE).unwrap();

        let rebased = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(rebased.title, "Holy Forever");
        assert_eq!(rebased.remote_rev, Some(6));
        assert!(rebased.dirty);

        let pending = outbox.get_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].base_rev, Some(6));

        // Resolving twice is rejected
        assert!(repo.resolve_keep_local(&conflict, DEVICE).is_err());
    }

    #[test]
    fn accept_remote_overwrites_local_and_drops_queue() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("Goodness of God");
        repo.insert_song(&song, DEVICE).unwrap();

        let remote_song = Song {
            id: song.id,
            dirty: false,
            ..Song::new("Goodness of God (radio)")
        };
        let remote = serde_json::to_value(&remote_song).unwrap();
        let RemoteApply::Conflicted(conflict) = repo
            .apply_remote_upsert(EntityType::Song, song.id.as_uuid(), 8, &remote)
            .unwrap()
        else {
            panic!("expected conflict");
        };

        repo.resolve_accept_remote(&conflict).unwrap();

        let taken = repo.get_song(&song.id).unwrap().unwrap();
        assert_eq!(taken.title, "Goodness of God (radio)");
        assert_eq!(taken.remote_rev, Some(8));
        assert!(!taken.dirty);
        assert!(outbox.get_pending(10).unwrap().is_empty());
    }

    #[test]
    fn accept_remote_without_remote_side_is_rejected() {
        let db = setup();
        let repo = SqliteCatalogRepository::new(db.connection());
        let outbox = SqliteOutboxRepository::new(db.connection());

        let song = Song::new("What a Beautiful Name");
        repo.insert_song(&song, DEVICE).unwrap();
        let item = outbox.get_pending(1).unwrap().remove(0);
        let conflict = repo.record_push_conflict(&item).unwrap();

        let err = repo.resolve_accept_remote(&conflict).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));

        // Local copy untouched, conflict still open
        assert!(repo.get_song(&song.id).unwrap().is_some());
    }
}
