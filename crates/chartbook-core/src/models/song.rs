//! Song model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a song, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongId(Uuid);

impl SongId {
    /// Create a new unique song ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SongId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SongId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for SongId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A song in the catalog.
///
/// Sync-control fields (`remote_rev`, `dirty`, `deleted`) track the row's
/// relationship to the server copy. A song with `remote_rev == None` has
/// never been accepted by the server and may be hard-deleted locally; a
/// synced song is tombstoned instead so the deletion propagates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    /// Unique identifier
    pub id: SongId,
    /// Song title
    pub title: String,
    /// Performing or original artist
    #[serde(default)]
    pub artist: Option<String>,
    /// Default musical key, e.g. "G" or "Bm"
    #[serde(default)]
    pub default_key: Option<String>,
    /// Tempo in beats per minute
    #[serde(default)]
    pub tempo_bpm: Option<u32>,
    /// Server-assigned revision; `None` until first successful push
    #[serde(default)]
    pub remote_rev: Option<i64>,
    /// Local changes not yet confirmed accepted by the server
    #[serde(default)]
    pub dirty: bool,
    /// Soft-delete tombstone
    #[serde(default)]
    pub deleted: bool,
    /// Creation timestamp (client clock)
    pub created_at: DateTime<Utc>,
    /// Last update timestamp (client clock)
    pub updated_at: DateTime<Utc>,
}

impl Song {
    /// Create a new local-only song with the given title
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SongId::new(),
            title: title.into(),
            artist: None,
            default_key: None,
            tempo_bpm: None,
            remote_rev: None,
            dirty: true,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the server has never accepted this song
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        self.remote_rev.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_song_is_dirty_and_local_only() {
        let song = Song::new("Be Thou My Vision");
        assert!(song.dirty);
        assert!(song.is_local_only());
        assert!(!song.deleted);
        assert_eq!(song.created_at, song.updated_at);
    }

    #[test]
    fn song_id_round_trips_through_string() {
        let id = SongId::new();
        let parsed: SongId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn payload_without_sync_fields_deserializes_clean() {
        // Pulled entity payloads omit local bookkeeping fields.
        let json = serde_json::json!({
            "id": SongId::new(),
            "title": "How Great Thou Art",
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let song: Song = serde_json::from_value(json).unwrap();
        assert!(!song.dirty);
        assert!(song.remote_rev.is_none());
    }
}
