//! Entity type tag shared by the outbox, conflict store, and sync protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of syncable entity kinds.
///
/// Every repository and protocol switch matches exhaustively on this enum so
/// that adding a fourth entity kind fails to compile until each seam handles
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "song")]
    Song,
    #[serde(rename = "songVersion")]
    SongVersion,
    #[serde(rename = "sectionNote")]
    SectionNote,
}

impl EntityType {
    pub const ALL: [Self; 3] = [Self::Song, Self::SongVersion, Self::SectionNote];

    /// Identifier stored in local tables and outbox rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::SongVersion => "songVersion",
            Self::SectionNote => "sectionNote",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "song" => Ok(Self::Song),
            "songVersion" => Ok(Self::SongVersion),
            "sectionNote" => Ok(Self::SectionNote),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown entity type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_store_identifier() {
        for entity_type in EntityType::ALL {
            assert_eq!(
                entity_type.as_str().parse::<EntityType>().unwrap(),
                entity_type
            );
        }
    }

    #[test]
    fn rejects_unknown_identifier() {
        assert!("playlist".parse::<EntityType>().is_err());
    }
}
