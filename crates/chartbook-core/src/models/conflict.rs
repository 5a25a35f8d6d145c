//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityType;

/// A unique identifier for a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Remote side of a conflict.
///
/// Push-detected conflicts start without a remote side; a later pull fills
/// it in with either the server's entity payload or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConflictRemote {
    /// Server holds a newer entity state
    Upsert {
        rev: i64,
        entity: serde_json::Value,
    },
    /// Server deleted the entity
    Delete { rev: i64 },
}

/// A detected divergence between local and remote state for one entity,
/// awaiting a human decision.
///
/// Snapshots are deep copies taken at detection time; the live entity may
/// continue to mutate underneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: ConflictId,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    /// Local entity state at detection time
    pub local_snapshot: serde_json::Value,
    /// Remote state, when known
    pub remote_snapshot: Option<ConflictRemote>,
    pub created_at: DateTime<Utc>,
    /// Set by resolution; resolved rows are kept as an audit trail
    pub resolved: bool,
}

impl SyncConflict {
    /// Create a new unresolved conflict
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        entity_id: Uuid,
        local_snapshot: serde_json::Value,
        remote_snapshot: Option<ConflictRemote>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            entity_type,
            entity_id,
            local_snapshot,
            remote_snapshot,
            created_at: Utc::now(),
            resolved: false,
        }
    }
}
