//! Song version (chart) model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SongId;

/// A unique identifier for a chart version, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for VersionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A concrete chart of a song: one arrangement in one key.
///
/// `body` holds the chord-chart text. Several versions of the same song may
/// coexist (e.g. "Acoustic in G", "Full band in A").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongVersion {
    /// Unique identifier
    pub id: VersionId,
    /// Owning song
    pub song_id: SongId,
    /// Human-readable arrangement name
    pub name: String,
    /// Key this chart is written in
    #[serde(default)]
    pub key: Option<String>,
    /// Capo position, if any
    #[serde(default)]
    pub capo: Option<u8>,
    /// Chord-chart text
    pub body: String,
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

impl SongVersion {
    /// Create a new local-only version for the given song
    #[must_use]
    pub fn new(song_id: SongId, name: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: VersionId::new(),
            song_id,
            name: name.into(),
            key: None,
            capo: None,
            body: body.into(),
            remote_rev: None,
            dirty: true,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the server has never accepted this version
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        self.remote_rev.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_version_is_dirty_and_local_only() {
        let version = SongVersion::new(SongId::new(), "Acoustic in G", "[G]Amazing [C]grace");
        assert!(version.dirty);
        assert!(version.is_local_only());
        assert!(!version.deleted);
    }
}
