use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    errors::{StoreError, StoreResult},
    ids::{ItemId, OutboxId},
};

/// Create-item input
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewAuctionItem {
    pub title: String,
    pub description: String,
    pub price_cents: i64,
}

/// Auction item row. Immutable once created in this pipeline's scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuctionItem {
    pub id: ItemId,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Dispatched => "dispatched",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "dispatched" => Ok(OutboxStatus::Dispatched),
            "failed" => Ok(OutboxStatus::Failed),
            _ => Err(StoreError::InvalidArgument("unknown outbox status")),
        }
    }
}

/// Outbox row as seen by the relay after a claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub item_id: ItemId,
    pub payload: Json,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: i64,
    pub dispatched: i64,
    pub failed: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemEventKind {
    Created,
    Updated,
    Deleted,
}

/// Wire payload stored in the outbox and published to the broker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemEvent {
    pub kind: ItemEventKind,
    pub item_id: ItemId,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl ItemEvent {
    pub fn created(item: &AuctionItem) -> Self {
        Self {
            kind: ItemEventKind::Created,
            item_id: item.id,
            title: item.title.clone(),
            description: item.description.clone(),
            price_cents: item.price_cents,
            created_at: item.created_at,
        }
    }

    pub fn deleted(item_id: ItemId) -> Self {
        Self {
            kind: ItemEventKind::Deleted,
            item_id,
            title: String::new(),
            description: String::new(),
            price_cents: 0,
            created_at: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> Json {
        // Serialization of a plain struct with serializable fields cannot fail.
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_payload(payload: &Json) -> StoreResult<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    pub fn document(&self, indexed_at: DateTime<Utc>) -> ItemDocument {
        ItemDocument {
            item_id: self.item_id,
            title: self.title.clone(),
            description: self.description.clone(),
            price_cents: self.price_cents,
            created_at: self.created_at,
            indexed_at,
        }
    }
}

/// Searchable projection of an auction item, owned by the consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDocument {
    pub item_id: ItemId,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_rejects_unknown() {
        assert!(OutboxStatus::parse("pending").is_ok());
        assert!(OutboxStatus::parse("shipped").is_err());
    }

    #[test]
    fn event_decode_rejects_garbage() {
        let err = ItemEvent::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, StoreError::MalformedPayload(_)));

        // Valid JSON but wrong shape is malformed too.
        let err = ItemEvent::from_bytes(br#"{"kind":"created"}"#).unwrap_err();
        assert!(matches!(err, StoreError::MalformedPayload(_)));
    }

    #[test]
    fn event_payload_survives_outbox_storage() {
        let item = AuctionItem {
            id: ItemId::new(),
            title: "Walnut writing desk".into(),
            description: "Early 20th century, restored".into(),
            price_cents: 45_00,
            created_at: Utc::now(),
        };
        let ev = ItemEvent::created(&item);
        let back = ItemEvent::from_payload(&ev.to_payload()).unwrap();
        assert_eq!(back.item_id, item.id);
        assert_eq!(back.kind, ItemEventKind::Created);
        assert_eq!(back.price_cents, 45_00);
    }
}
