//! Shared catalog service wrapper used across clients.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    CatalogRepository, ConflictRepository, Database, OutboxRepository, RemoteApply,
    SqliteCatalogRepository, SqliteConflictRepository, SqliteOutboxRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::models::{
    ConflictId, EntityType, OutboxItem, OutboxItemId, SectionNote, SectionNoteId, Song, SongId,
    SongVersion, SyncConflict, SyncState, VersionId,
};
use crate::{Error, Result};

/// Thread-safe service over the local catalog store.
///
/// All repository access goes through one `tokio` mutex, so a sync cycle and
/// a CLI command never interleave statements on the same connection.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<Mutex<Database>>,
    device_id: String,
}

impl CatalogService {
    /// Open a catalog service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, device_id: impl Into<String>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            device_id: device_id.into(),
        })
    }

    /// Open an in-memory catalog service (primarily for tests).
    pub async fn open_in_memory(device_id: impl Into<String>) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            device_id: device_id.into(),
        })
    }

    /// Stable identifier sent with every push batch.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // Songs

    /// Create a new song and queue it for upload.
    pub async fn create_song(&self, song: Song) -> Result<Song> {
        if song.title.trim().is_empty() {
            return Err(Error::InvalidInput("Song title cannot be empty".to_string()));
        }
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.insert_song(&song, &self.device_id)?;
        Ok(song)
    }

    /// Fetch a song by id.
    pub async fn get_song(&self, id: &SongId) -> Result<Option<Song>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.get_song(id)
    }

    /// List songs by title.
    pub async fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.list_songs(limit, offset)
    }

    /// Update a song and queue the edit for upload.
    pub async fn update_song(&self, song: Song) -> Result<Song> {
        if song.title.trim().is_empty() {
            return Err(Error::InvalidInput("Song title cannot be empty".to_string()));
        }
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.update_song(&song, &self.device_id)
    }

    /// Delete a song. Synced songs are tombstoned so the deletion uploads;
    /// local-only songs disappear outright.
    pub async fn delete_song(&self, id: &SongId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.delete_song(id, &self.device_id)
    }

    // Chart versions

    /// Create a chart version under a song.
    pub async fn create_version(&self, version: SongVersion) -> Result<SongVersion> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        if repo.get_song(&version.song_id)?.is_none() {
            return Err(Error::NotFound(version.song_id.to_string()));
        }
        repo.insert_version(&version, &self.device_id)?;
        Ok(version)
    }

    /// Fetch a chart version by id.
    pub async fn get_version(&self, id: &VersionId) -> Result<Option<SongVersion>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.get_version(id)
    }

    /// List a song's chart versions, oldest first.
    pub async fn list_versions(&self, song_id: &SongId) -> Result<Vec<SongVersion>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.list_versions(song_id)
    }

    /// Update a chart version.
    pub async fn update_version(&self, version: SongVersion) -> Result<SongVersion> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.update_version(&version, &self.device_id)
    }

    /// Delete a chart version.
    pub async fn delete_version(&self, id: &VersionId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.delete_version(id, &self.device_id)
    }

    // Section notes

    /// Attach a note to a section of a chart version.
    pub async fn create_note(&self, note: SectionNote) -> Result<SectionNote> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        if repo.get_version(&note.version_id)?.is_none() {
            return Err(Error::NotFound(note.version_id.to_string()));
        }
        repo.insert_note(&note, &self.device_id)?;
        Ok(note)
    }

    /// Fetch a section note by id.
    pub async fn get_note(&self, id: &SectionNoteId) -> Result<Option<SectionNote>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.get_note(id)
    }

    /// List a version's section notes, oldest first.
    pub async fn list_notes(&self, version_id: &VersionId) -> Result<Vec<SectionNote>> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.list_notes(version_id)
    }

    /// Update a section note.
    pub async fn update_note(&self, note: SectionNote) -> Result<SectionNote> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.update_note(&note, &self.device_id)
    }

    /// Delete a section note.
    pub async fn delete_note(&self, id: &SectionNoteId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.delete_note(id, &self.device_id)
    }

    /// Resolve an ID prefix to a single full entity id.
    pub async fn resolve_id(&self, entity_type: EntityType, prefix: &str) -> Result<Uuid> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        let mut matches = repo.ids_by_prefix(entity_type, prefix, 2)?;
        match matches.len() {
            0 => Err(Error::NotFound(prefix.to_string())),
            1 => {
                let id = matches.remove(0);
                id.parse()
                    .map_err(|_| Error::InvalidInput(format!("Invalid id: {id}")))
            }
            _ => Err(Error::InvalidInput(format!(
                "Prefix '{prefix}' matches more than one {entity_type}"
            ))),
        }
    }

    // Sync engine store operations

    /// Pending outbox items in enqueue order, marked SENT before release.
    ///
    /// Marking happens in the same lock scope so a concurrent caller can
    /// never receive the same batch.
    pub async fn take_push_batch(&self, limit: usize) -> Result<Vec<OutboxItem>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        let batch = repo.get_pending(limit)?;
        if !batch.is_empty() {
            let ids: Vec<OutboxItemId> = batch.iter().map(|item| item.id).collect();
            repo.mark_sent(&ids)?;
        }
        Ok(batch)
    }

    /// Apply an APPLIED push result. Returns false for a replayed result.
    pub async fn acknowledge_applied(&self, item: &OutboxItem, new_rev: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.acknowledge_applied(item, new_rev)
    }

    /// Record a CONFLICT push result against the local snapshot.
    pub async fn record_push_conflict(&self, item: &OutboxItem) -> Result<SyncConflict> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.record_push_conflict(item)
    }

    /// Record a REJECTED push result with the server's message.
    pub async fn record_push_rejection(&self, item: &OutboxItem, message: &str) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.mark_rejected(&item.id, message)
    }

    /// Apply one pulled remote upsert, honoring the dirty guard.
    pub async fn apply_remote_upsert(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
        payload: &serde_json::Value,
    ) -> Result<RemoteApply> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.apply_remote_upsert(entity_type, entity_id, rev, payload)
    }

    /// Apply one pulled remote delete, honoring the dirty guard.
    pub async fn apply_remote_delete(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        rev: i64,
    ) -> Result<RemoteApply> {
        let db = self.db.lock().await;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.apply_remote_delete(entity_type, entity_id, rev)
    }

    /// Load the persisted sync cursor and status fields.
    pub async fn load_sync_state(&self) -> Result<SyncState> {
        let db = self.db.lock().await;
        let repo = SqliteSyncStateRepository::new(db.connection());
        repo.load()
    }

    /// Persist the sync cursor and status fields.
    pub async fn save_sync_state(&self, state: &SyncState) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteSyncStateRepository::new(db.connection());
        repo.save(state)
    }

    /// Outbox counts per status, for diagnostics.
    pub async fn outbox_counts(&self) -> Result<BTreeMap<&'static str, u64>> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.count_by_status()
    }

    /// Requeue SENT items older than the cutoff back to PENDING. These are
    /// batches whose results never arrived, typically after a crash between
    /// send and acknowledge.
    pub async fn requeue_stale_sent(&self, older_than: Duration) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteOutboxRepository::new(db.connection());
        repo.requeue_stale_sent(older_than)
    }

    // Conflicts

    /// Unresolved conflicts, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = SqliteConflictRepository::new(db.connection());
        repo.get_unresolved()
    }

    /// Fetch a conflict by id.
    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = SqliteConflictRepository::new(db.connection());
        repo.get(id)
    }

    /// Resolve a conflict by keeping the local copy and re-pushing it.
    pub async fn resolve_keep_local(&self, id: &ConflictId) -> Result<()> {
        let db = self.db.lock().await;
        let conflicts = SqliteConflictRepository::new(db.connection());
        let conflict = conflicts
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.resolve_keep_local(&conflict, &self.device_id)
    }

    /// Resolve a conflict by taking the remote copy.
    pub async fn resolve_accept_remote(&self, id: &ConflictId) -> Result<()> {
        let db = self.db.lock().await;
        let conflicts = SqliteConflictRepository::new(db.connection());
        let conflict = conflicts
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let repo = SqliteCatalogRepository::new(db.connection());
        repo.resolve_accept_remote(&conflict)
    }

    /// Drop resolved conflict rows older than the retention window.
    pub async fn cleanup_resolved_conflicts(&self, older_than_days: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteConflictRepository::new(db.connection());
        repo.cleanup_resolved(older_than_days)
    }

    /// Reset the pull cursor so the next sync replays the full remote
    /// history. With `hard`, clean synced rows are purged too; dirty rows
    /// and the outbox always survive.
    pub async fn reset_sync(&self, hard: bool) -> Result<usize> {
        let db = self.db.lock().await;
        let state_repo = SqliteSyncStateRepository::new(db.connection());
        state_repo.clear()?;

        if hard {
            let repo = SqliteCatalogRepository::new(db.connection());
            repo.purge_clean_synced()
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboxStatus;
    use pretty_assertions::assert_eq;

    async fn service() -> CatalogService {
        CatalogService::open_in_memory("device-test").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_list_songs() {
        let service = service().await;

        service.create_song(Song::new("Abide")).await.unwrap();
        service.create_song(Song::new("Zion")).await.unwrap();

        let songs = service.list_songs(10, 0).await.unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].title, "Abide");
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let service = service().await;
        let err = service.create_song(Song::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn version_requires_existing_song() {
        let service = service().await;
        let orphan = SongVersion::new(SongId::new(), "Acoustic", "[G]...");
        let err = service.create_version(orphan).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn take_push_batch_marks_sent_atomically() {
        let service = service().await;

        service.create_song(Song::new("First")).await.unwrap();
        service.create_song(Song::new("Second")).await.unwrap();

        let batch = service.take_push_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);

        // A second call sees nothing left to send
        assert!(service.take_push_batch(10).await.unwrap().is_empty());

        let counts = service.outbox_counts().await.unwrap();
        assert_eq!(counts[OutboxStatus::Sent.as_str()], 2);
        assert_eq!(counts[OutboxStatus::Pending.as_str()], 0);
    }

    #[tokio::test]
    async fn resolve_id_by_prefix() {
        let service = service().await;
        let song = service.create_song(Song::new("Doxology")).await.unwrap();

        let prefix: String = song.id.as_str().chars().take(10).collect();
        let resolved = service
            .resolve_id(EntityType::Song, &prefix)
            .await
            .unwrap();
        assert_eq!(resolved, song.id.as_uuid());

        let missing = service.resolve_id(EntityType::Song, "ffffffff").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn reset_sync_clears_cursor_and_optionally_purges() {
        let service = service().await;

        let mut state = service.load_sync_state().await.unwrap();
        state.last_cursor = Some("cursor-42".to_string());
        service.save_sync_state(&state).await.unwrap();

        service.reset_sync(false).await.unwrap();
        assert_eq!(service.load_sync_state().await.unwrap().last_cursor, None);

        // Hard reset purges clean synced rows but keeps dirty ones
        let song = service.create_song(Song::new("Kept")).await.unwrap();
        let synced = Song {
            dirty: false,
            ..Song::new("Purged")
        };
        service
            .apply_remote_upsert(
                EntityType::Song,
                synced.id.as_uuid(),
                1,
                &serde_json::to_value(&synced).unwrap(),
            )
            .await
            .unwrap();

        let purged = service.reset_sync(true).await.unwrap();
        assert_eq!(purged, 1);
        assert!(service.get_song(&song.id).await.unwrap().is_some());
        assert!(service.get_song(&synced.id).await.unwrap().is_none());
    }
}
