//! Wire types for the push and pull endpoints.
//!
//! Entity type tags travel as `SONG`, `SONG_VERSION`, and `SECTION_NOTE`;
//! the store spelling (`song`, `songVersion`, `sectionNote`) never crosses
//! the wire. The mapping is total in both directions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntityType, OutboxItem, OutboxItemId, OutboxOp};

/// serde adapter for the wire spelling of [`EntityType`]
mod wire_entity_type {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::models::EntityType;

    pub const fn to_wire(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Song => "SONG",
            EntityType::SongVersion => "SONG_VERSION",
            EntityType::SectionNote => "SECTION_NOTE",
        }
    }

    pub fn from_wire(raw: &str) -> Option<EntityType> {
        match raw {
            "SONG" => Some(EntityType::Song),
            "SONG_VERSION" => Some(EntityType::SongVersion),
            "SECTION_NOTE" => Some(EntityType::SectionNote),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(
        entity_type: &EntityType,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(to_wire(*entity_type))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EntityType, D::Error> {
        let raw = String::deserialize(deserializer)?;
        from_wire(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown entity type: {raw}")))
    }
}

/// Body posted to `/v1/sync/push`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub mutations: Vec<MutationEnvelope>,
}

/// One outbox item on the wire. `mutation_id` is the outbox id, so results
/// can be matched back and replays detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEnvelope {
    pub mutation_id: OutboxItemId,
    pub device_id: String,
    #[serde(with = "wire_entity_type")]
    pub entity_type: EntityType,
    pub op: OutboxOp,
    pub entity_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_rev: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl From<&OutboxItem> for MutationEnvelope {
    fn from(item: &OutboxItem) -> Self {
        Self {
            mutation_id: item.id,
            device_id: item.device_id.clone(),
            entity_type: item.entity_type,
            op: item.op,
            entity_id: item.entity_id,
            base_rev: item.base_rev,
            payload: item.payload.clone(),
        }
    }
}

/// Body returned by `/v1/sync/push`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<MutationResult>,
}

/// Per-mutation server verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult {
    pub mutation_id: OutboxItemId,
    pub status: MutationStatus,
    pub entity_id: Uuid,
    #[serde(default)]
    pub new_rev: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    #[serde(rename = "APPLIED")]
    Applied,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "REJECTED")]
    Rejected,
}

/// Body posted to `/v1/sync/pull`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_cursor: Option<String>,
    pub limit: u32,
    pub include_entities: bool,
}

/// One page of remote changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<RemoteChange>,
    /// Entity payloads keyed by id; present when `include_entities` was set
    #[serde(default)]
    pub entities: HashMap<Uuid, serde_json::Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    pub has_more: bool,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    #[serde(with = "wire_entity_type")]
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub op: ChangeOp,
    pub rev: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "UPSERT")]
    Upsert,
    #[serde(rename = "DELETE")]
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutboxOp, Song};
    use pretty_assertions::assert_eq;

    #[test]
    fn entity_type_wire_mapping_is_invertible() {
        for entity_type in EntityType::ALL {
            let wire = wire_entity_type::to_wire(entity_type);
            assert_eq!(wire_entity_type::from_wire(wire), Some(entity_type));
        }
        assert_eq!(wire_entity_type::from_wire("PLAYLIST"), None);
    }

    #[test]
    fn envelope_serializes_wire_field_names() {
        let song = Song::new("How Firm a Foundation");
        let item = OutboxItem::new(
            "device-a",
            EntityType::Song,
            OutboxOp::Upsert,
            song.id.as_uuid(),
            None,
            Some(serde_json::to_value(&song).unwrap()),
        );

        let value = serde_json::to_value(MutationEnvelope::from(&item)).unwrap();
        assert_eq!(value["entity_type"], serde_json::json!("SONG"));
        assert_eq!(value["op"], serde_json::json!("UPSERT"));
        assert_eq!(value["device_id"], serde_json::json!("device-a"));
        // Absent optionals are omitted, not null
        assert!(value.get("base_rev").is_none());
    }

    #[test]
    fn pull_response_parses_a_minimal_page() {
        let entity_id = Uuid::now_v7();
        let raw = serde_json::json!({
            "changes": [
                {"entity_type": "SONG_VERSION", "entity_id": entity_id, "op": "DELETE", "rev": 12}
            ],
            "next_cursor": "c-12",
            "has_more": false
        });

        let page: PullResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(page.changes.len(), 1);
        assert_eq!(page.changes[0].entity_type, EntityType::SongVersion);
        assert_eq!(page.changes[0].op, ChangeOp::Delete);
        assert!(page.entities.is_empty());
        assert_eq!(page.next_cursor.as_deref(), Some("c-12"));
        assert!(page.server_time.is_none());
    }
}
