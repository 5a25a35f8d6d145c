//! Section note model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VersionId;

/// A unique identifier for a section note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionNoteId(Uuid);

impl SectionNoteId {
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

impl Default for SectionNoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SectionNoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SectionNoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for SectionNoteId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Free-form performance note attached to a section of a chart version
/// (e.g. "chorus: build on repeat").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionNote {
    /// Unique identifier
    pub id: SectionNoteId,
    /// Owning chart version
    pub version_id: VersionId,
    /// Section label the note belongs to ("verse 2", "bridge", ...)
    pub section: String,
    /// Note text
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

impl SectionNote {
    /// Create a new local-only note for the given version
    #[must_use]
    pub fn new(
        version_id: VersionId,
        section: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SectionNoteId::new(),
            version_id,
            section: section.into(),
            body: body.into(),
            remote_rev: None,
            dirty: true,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the server has never accepted this note
    #[must_use]
    pub const fn is_local_only(&self) -> bool {
        self.remote_rev.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_note_is_dirty() {
        let note = SectionNote::new(VersionId::new(), "chorus", "build on repeat");
        assert!(note.dirty);
        assert!(note.remote_rev.is_none());
    }
}
