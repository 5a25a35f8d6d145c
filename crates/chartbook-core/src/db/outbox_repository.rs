//! Outbox repository implementation

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EntityType, OutboxItem, OutboxItemId, OutboxStatus};
use crate::util::{format_ts, parse_ts};

/// Trait for the durable at-least-once delivery queue of local mutations
pub trait OutboxRepository {
    /// Append a new item. Must run inside the same transaction as the entity
    /// write it represents so queue and entity never diverge after a crash.
    fn add(&self, item: &OutboxItem) -> Result<()>;

    /// Get an item by ID
    fn get(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>>;

    /// Up to `limit` PENDING items in stable creation order
    fn get_pending(&self, limit: usize) -> Result<Vec<OutboxItem>>;

    /// Flip a batch of PENDING items to SENT with a `sent_at` stamp.
    /// Runs as one statement, so the batch is marked atomically.
    fn mark_sent(&self, ids: &[OutboxItemId]) -> Result<usize>;

    /// Set status and optional error. A missing row is a no-op: the push
    /// cycle tolerates items vanishing between read and update (e.g. a
    /// concurrent user action) by skipping, never by failing.
    fn update_status(
        &self,
        id: &OutboxItemId,
        status: OutboxStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Delete an acknowledged item. Returns whether a row was removed, so
    /// replaying the same APPLIED result is an observable no-op.
    fn acknowledge(&self, id: &OutboxItemId) -> Result<bool>;

    /// Mark an item CONFLICT after the server rejected its base revision
    fn mark_conflict(&self, id: &OutboxItemId) -> Result<()>;

    /// Mark an item REJECTED with the server-supplied error
    fn mark_rejected(&self, id: &OutboxItemId, error_message: &str) -> Result<()>;

    /// Diagnostic aggregate; always returns all five statuses
    fn count_by_status(&self) -> Result<BTreeMap<&'static str, u64>>;

    /// Re-queue SENT items older than the threshold back to PENDING.
    ///
    /// The push phase marks items SENT before the network call, so a crash
    /// between mark and response parks them. This sweep is the explicit
    /// operator-invoked repair; it is never run automatically.
    fn requeue_stale_sent(&self, older_than: Duration) -> Result<usize>;

    /// True when any PENDING/SENT/CONFLICT item references the entity
    fn has_open_items_for(&self, entity_type: EntityType, entity_id: Uuid) -> Result<bool>;

    /// Drop all items for an entity (used when hard-deleting a local-only
    /// entity the server never saw)
    fn delete_for_entity(&self, entity_type: EntityType, entity_id: Uuid) -> Result<usize>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row<'_>) -> Result<OutboxItem> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(2)?;
        let op: String = row.get(3)?;
        let entity_id: String = row.get(4)?;
        let payload: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        let status: String = row.get(8)?;
        let sent_at: Option<String> = row.get(10)?;

        Ok(OutboxItem {
            id: id
                .parse()
                .map_err(|_| crate::Error::InvalidInput(format!("Invalid outbox id: {id}")))?,
            device_id: row.get(1)?,
            entity_type: entity_type.parse()?,
            op: op.parse()?,
            entity_id: Uuid::parse_str(&entity_id)
                .map_err(|_| crate::Error::InvalidInput(format!("Invalid entity id: {entity_id}")))?,
            base_rev: row.get(5)?,
            payload: payload.map(|raw| serde_json::from_str(&raw)).transpose()?,
            created_at: parse_ts(&created_at)?,
            status: status.parse()?,
            error_message: row.get(9)?,
            sent_at: sent_at.as_deref().map(parse_ts).transpose()?,
        })
    }

    fn query_items(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<OutboxItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw_rows = stmt.query(params)?;
        let mut items = Vec::new();
        let mut rows = raw_rows;
        while let Some(row) = rows.next()? {
            items.push(Self::parse_item(row)?);
        }
        Ok(items)
    }
}

const SELECT_COLUMNS: &str = "id, device_id, entity_type, op, entity_id, base_rev, payload, \
                              created_at, status, error_message, sent_at";

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn add(&self, item: &OutboxItem) -> Result<()> {
        let payload = item
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO outbox (id, device_id, entity_type, op, entity_id, base_rev, payload, \
             created_at, status, error_message, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.as_str(),
                item.device_id,
                item.entity_type.as_str(),
                item.op.as_str(),
                item.entity_id.to_string(),
                item.base_rev,
                payload,
                format_ts(&item.created_at),
                item.status.as_str(),
                item.error_message,
                item.sent_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>> {
        let items = self.query_items(
            &format!("SELECT {SELECT_COLUMNS} FROM outbox WHERE id = ?"),
            &[&id.as_str()],
        )?;
        Ok(items.into_iter().next())
    }

    fn get_pending(&self, limit: usize) -> Result<Vec<OutboxItem>> {
        self.query_items(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE status = 'PENDING'
                 ORDER BY created_at, id
                 LIMIT ?"
            ),
            &[&(limit as i64)],
        )
    }

    fn mark_sent(&self, ids: &[OutboxItemId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE outbox SET status = 'SENT', sent_at = ?
             WHERE status = 'PENDING' AND id IN ({placeholders})"
        );

        let now = format_ts(&Utc::now());
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        for id in ids {
            params.push(Box::new(id.as_str()));
        }
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();

        Ok(self.conn.execute(&sql, refs.as_slice())?)
    }

    fn update_status(
        &self,
        id: &OutboxItemId,
        status: OutboxStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE outbox SET status = ?, error_message = ? WHERE id = ?",
            params![status.as_str(), error_message, id.as_str()],
        )?;
        Ok(())
    }

    fn acknowledge(&self, id: &OutboxItemId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM outbox WHERE id = ?", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn mark_conflict(&self, id: &OutboxItemId) -> Result<()> {
        self.update_status(id, OutboxStatus::Conflict, None)
    }

    fn mark_rejected(&self, id: &OutboxItemId, error_message: &str) -> Result<()> {
        self.update_status(id, OutboxStatus::Rejected, Some(error_message))
    }

    fn count_by_status(&self) -> Result<BTreeMap<&'static str, u64>> {
        let mut counts: BTreeMap<&'static str, u64> =
            OutboxStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM outbox GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            let status: OutboxStatus = status.parse()?;
            counts.insert(status.as_str(), count);
        }

        Ok(counts)
    }

    fn requeue_stale_sent(&self, older_than: Duration) -> Result<usize> {
        let threshold = format_ts(&(Utc::now() - older_than));
        let requeued = self.conn.execute(
            "UPDATE outbox SET status = 'PENDING', sent_at = NULL
             WHERE status = 'SENT' AND sent_at IS NOT NULL AND sent_at < ?",
            params![threshold],
        )?;
        if requeued > 0 {
            tracing::info!("Re-queued {requeued} stale SENT outbox items");
        }
        Ok(requeued)
    }

    fn has_open_items_for(&self, entity_type: EntityType, entity_id: Uuid) -> Result<bool> {
        let open: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM outbox
             WHERE entity_type = ? AND entity_id = ?
               AND status IN ('PENDING', 'SENT', 'CONFLICT'))",
            params![entity_type.as_str(), entity_id.to_string()],
            |row| row.get::<_, i32>(0).map(|v| v != 0),
        )?;
        Ok(open)
    }

    fn delete_for_entity(&self, entity_type: EntityType, entity_id: Uuid) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM outbox WHERE entity_type = ? AND entity_id = ?",
            params![entity_type.as_str(), entity_id.to_string()],
        )?)
    }
}
