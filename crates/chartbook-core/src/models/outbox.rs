//! Outbox model: durable queue of not-yet-acknowledged local mutations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityType;

/// A unique identifier for an outbox item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxItemId(Uuid);

impl OutboxItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OutboxItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation kind carried by an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxOp {
    #[serde(rename = "UPSERT")]
    Upsert,
    #[serde(rename = "DELETE")]
    Delete,
}

impl OutboxOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "UPSERT",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for OutboxOp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPSERT" => Ok(Self::Upsert),
            "DELETE" => Ok(Self::Delete),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown outbox op: {other}"
            ))),
        }
    }
}

/// Delivery state of an outbox item.
///
/// PENDING → SENT → ACK (row deleted) | CONFLICT | REJECTED. ACK rows are
/// removed once applied; CONFLICT and REJECTED are terminal and require a
/// human decision before the entity can make progress again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl OutboxStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Sent,
        Self::Ack,
        Self::Conflict,
        Self::Rejected,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Ack => "ACK",
            Self::Conflict => "CONFLICT",
            Self::Rejected => "REJECTED",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "ACK" => Ok(Self::Ack),
            "CONFLICT" => Ok(Self::Conflict),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown outbox status: {other}"
            ))),
        }
    }
}

/// A pending local mutation awaiting transmission to the server.
///
/// `base_rev` pins the mutation to the entity revision it was derived from
/// so the server can reject stale bases. Multiple items for one entity may
/// coexist; they are submitted in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub device_id: String,
    pub entity_type: EntityType,
    pub op: OutboxOp,
    pub entity_id: Uuid,
    pub base_rev: Option<i64>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub error_message: Option<String>,
    /// Set when the item was last included in a push batch
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// Create a PENDING item for a local mutation
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        entity_type: EntityType,
        op: OutboxOp,
        entity_id: Uuid,
        base_rev: Option<i64>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: OutboxItemId::new(),
            device_id: device_id.into(),
            entity_type,
            op,
            entity_id,
            base_rev,
            payload,
            created_at: Utc::now(),
            status: OutboxStatus::Pending,
            error_message: None,
            sent_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_round_trips_through_store_identifier() {
        for status in OutboxStatus::ALL {
            assert_eq!(
                status.as_str().parse::<OutboxStatus>().unwrap(),
                status
            );
        }
    }

    #[test]
    fn new_item_starts_pending() {
        let item = OutboxItem::new(
            "device-a",
            EntityType::Song,
            OutboxOp::Upsert,
            Uuid::now_v7(),
            None,
            Some(serde_json::json!({"title": "x"})),
        );
        assert_eq!(item.status, OutboxStatus::Pending);
        assert!(item.sent_at.is_none());
        assert!(item.error_message.is_none());
    }
}
