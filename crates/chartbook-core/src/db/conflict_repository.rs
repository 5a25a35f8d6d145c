//! Conflict repository implementation

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ConflictId, ConflictRemote, EntityType, SyncConflict};
use crate::util::{format_ts, parse_ts};

/// Trait for the durable record of divergences awaiting a human decision
pub trait ConflictRepository {
    /// Record a divergence for an entity.
    ///
    /// At most one unresolved conflict exists per (entity type, entity id):
    /// when one is already open this returns it instead of inserting a
    /// duplicate, filling in the remote side if it was still unknown.
    /// Snapshots are stored as deep copies.
    fn create(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        local_snapshot: serde_json::Value,
        remote_snapshot: Option<ConflictRemote>,
    ) -> Result<SyncConflict>;

    /// Get a conflict by ID
    fn get(&self, id: &ConflictId) -> Result<Option<SyncConflict>>;

    /// All unresolved conflicts, oldest first
    fn get_unresolved(&self) -> Result<Vec<SyncConflict>>;

    /// First unresolved conflict for the entity key
    fn get_by_entity(&self, entity_type: EntityType, entity_id: Uuid)
        -> Result<Option<SyncConflict>>;

    /// Mark resolved. The row is kept as an audit trail.
    fn resolve(&self, id: &ConflictId) -> Result<()>;

    /// Remove a conflict record outright
    fn delete(&self, id: &ConflictId) -> Result<()>;

    /// Retention sweep over resolved records
    fn cleanup_resolved(&self, older_than_days: i64) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row<'_>) -> Result<SyncConflict> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(1)?;
        let entity_id: String = row.get(2)?;
        let local_snapshot: String = row.get(3)?;
        let remote_snapshot: Option<String> = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok(SyncConflict {
            id: id
                .parse()
                .map_err(|_| crate::Error::InvalidInput(format!("Invalid conflict id: {id}")))?,
            entity_type: entity_type.parse()?,
            entity_id: Uuid::parse_str(&entity_id)
                .map_err(|_| crate::Error::InvalidInput(format!("Invalid entity id: {entity_id}")))?,
            local_snapshot: serde_json::from_str(&local_snapshot)?,
            remote_snapshot: remote_snapshot
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            created_at: parse_ts(&created_at)?,
            resolved: row.get::<_, i32>(6)? != 0,
        })
    }

    fn set_remote(&self, id: &ConflictId, remote: &ConflictRemote) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_conflicts SET remote_snapshot = ? WHERE id = ?",
            params![serde_json::to_string(remote)?, id.as_str()],
        )?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str =
    "id, entity_type, entity_id, local_snapshot, remote_snapshot, created_at, resolved";

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn create(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        local_snapshot: serde_json::Value,
        remote_snapshot: Option<ConflictRemote>,
    ) -> Result<SyncConflict> {
        if let Some(existing) = self.get_by_entity(entity_type, entity_id)? {
            if existing.remote_snapshot.is_none() {
                if let Some(remote) = remote_snapshot {
                    self.set_remote(&existing.id, &remote)?;
                    return Ok(SyncConflict {
                        remote_snapshot: Some(remote),
                        ..existing
                    });
                }
            }
            return Ok(existing);
        }

        let conflict = SyncConflict::new(entity_type, entity_id, local_snapshot, remote_snapshot);
        self.conn.execute(
            "INSERT INTO sync_conflicts
             (id, entity_type, entity_id, local_snapshot, remote_snapshot, created_at, resolved)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
            params![
                conflict.id.as_str(),
                conflict.entity_type.as_str(),
                conflict.entity_id.to_string(),
                serde_json::to_string(&conflict.local_snapshot)?,
                conflict
                    .remote_snapshot
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                format_ts(&conflict.created_at),
            ],
        )?;

        tracing::warn!(
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            "Recorded sync conflict"
        );
        Ok(conflict)
    }

    fn get(&self, id: &ConflictId) -> Result<Option<SyncConflict>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM sync_conflicts WHERE id = ?"))?;
        let mut rows = stmt.query(params![id.as_str()])?;
        rows.next()?.map(Self::parse_conflict).transpose()
    }

    fn get_unresolved(&self) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_conflicts
             WHERE resolved = 0
             ORDER BY created_at, id"
        ))?;
        let mut rows = stmt.query([])?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next()? {
            conflicts.push(Self::parse_conflict(row)?);
        }
        Ok(conflicts)
    }

    fn get_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Option<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_conflicts
             WHERE entity_type = ? AND entity_id = ? AND resolved = 0
             ORDER BY created_at, id
             LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![entity_type.as_str(), entity_id.to_string()])?;
        rows.next()?.map(Self::parse_conflict).transpose()
    }

    fn resolve(&self, id: &ConflictId) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sync_conflicts SET resolved = 1 WHERE id = ?",
            params![id.as_str()],
        )?;
        if updated == 0 {
            return Err(crate::Error::NotFound(format!("Conflict {id}")));
        }
        Ok(())
    }

    fn delete(&self, id: &ConflictId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_conflicts WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn cleanup_resolved(&self, older_than_days: i64) -> Result<usize> {
        let threshold = format_ts(&(Utc::now() - Duration::days(older_than_days)));
        Ok(self.conn.execute(
            "DELETE FROM sync_conflicts WHERE resolved = 1 AND created_at < ?",
            params![threshold],
        )?)
    }
}
