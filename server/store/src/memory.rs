use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    errors::{StoreError, StoreResult},
    ids::{ItemId, OutboxId},
    model::{AuctionItem, ItemEvent, NewAuctionItem, OutboxCounts, OutboxRecord, OutboxStatus},
    repo::ItemsRepo,
};

/// In-memory [`ItemsRepo`] with the same claim-lease semantics as the
/// Postgres implementation. Used by loop tests and local runs.
#[derive(Clone)]
pub struct MemoryItemsRepo {
    inner: Arc<Mutex<Inner>>,
    claim_ttl: Duration,
}

struct Inner {
    items: Vec<AuctionItem>,
    outbox: Vec<Row>,
    next_id: i64,
    storage_down: bool,
}

#[derive(Clone)]
struct Row {
    record: OutboxRecord,
    claim_token: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
}

impl MemoryItemsRepo {
    pub fn new(claim_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: Vec::new(),
                outbox: Vec::new(),
                next_id: 1,
                storage_down: false,
            })),
            claim_ttl,
        }
    }

    /// Simulate the relational store going away; subsequent operations fail
    /// with a transient storage error until cleared.
    pub fn set_storage_down(&self, down: bool) {
        self.inner.lock().storage_down = down;
    }

    /// Age every active claim past the lease TTL, as if the claimant had
    /// crashed and the lease expired.
    pub fn expire_claims(&self) {
        let expired = Utc::now() - chrono::Duration::hours(1);
        for row in self.inner.lock().outbox.iter_mut() {
            if row.claim_token.is_some() {
                row.claimed_at = Some(expired);
            }
        }
    }

    pub fn outbox_snapshot(&self) -> Vec<OutboxRecord> {
        self.inner.lock().outbox.iter().map(|r| r.record.clone()).collect()
    }

    fn check_up(inner: &Inner) -> StoreResult<()> {
        if inner.storage_down {
            return Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemsRepo for MemoryItemsRepo {
    async fn create_item(&self, item: &NewAuctionItem) -> StoreResult<AuctionItem> {
        let mut inner = self.inner.lock();
        Self::check_up(&inner)?;

        let created = AuctionItem {
            id: ItemId::new(),
            title: item.title.clone(),
            description: item.description.clone(),
            price_cents: item.price_cents,
            created_at: Utc::now(),
        };

        // Same atomicity as the Postgres transaction: both inserts happen
        // under one lock, or neither does.
        let id = OutboxId(inner.next_id);
        inner.next_id += 1;
        inner.items.push(created.clone());
        inner.outbox.push(Row {
            record: OutboxRecord {
                id,
                item_id: created.id,
                payload: ItemEvent::created(&created).to_payload(),
                status: OutboxStatus::Pending,
                attempts: 0,
                created_at: created.created_at,
                dispatched_at: None,
            },
            claim_token: None,
            claimed_at: None,
        });
        Ok(created)
    }

    async fn claim_pending(&self, claim_token: Uuid, limit: i64) -> StoreResult<Vec<OutboxRecord>> {
        let mut inner = self.inner.lock();
        Self::check_up(&inner)?;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let mut claimed = Vec::new();
        for row in inner.outbox.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if row.record.status != OutboxStatus::Pending {
                continue;
            }
            let lease_held = match (row.claim_token, row.claimed_at) {
                (Some(_), Some(at)) => at + ttl > now,
                _ => false,
            };
            if lease_held {
                continue;
            }
            row.claim_token = Some(claim_token);
            row.claimed_at = Some(now);
            row.record.attempts += 1;
            claimed.push(row.record.clone());
        }
        Ok(claimed)
    }

    async fn mark_dispatched(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        Self::check_up(&inner)?;

        let mut n = 0;
        for row in inner.outbox.iter_mut() {
            if ids.contains(&row.record.id)
                && row.claim_token == Some(claim_token)
                && row.record.status == OutboxStatus::Pending
            {
                row.record.status = OutboxStatus::Dispatched;
                row.record.dispatched_at = Some(Utc::now());
                row.claim_token = None;
                row.claimed_at = None;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn mark_failed(&self, id: OutboxId, claim_token: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        Self::check_up(&inner)?;

        for row in inner.outbox.iter_mut() {
            if row.record.id == id
                && row.claim_token == Some(claim_token)
                && row.record.status == OutboxStatus::Pending
            {
                row.record.status = OutboxStatus::Failed;
                row.claim_token = None;
                row.claimed_at = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release_claims(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        Self::check_up(&inner)?;

        let mut n = 0;
        for row in inner.outbox.iter_mut() {
            if ids.contains(&row.record.id)
                && row.claim_token == Some(claim_token)
                && row.record.status == OutboxStatus::Pending
            {
                row.claim_token = None;
                row.claimed_at = None;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn outbox_counts(&self) -> StoreResult<OutboxCounts> {
        let inner = self.inner.lock();
        Self::check_up(&inner)?;

        let mut counts = OutboxCounts::default();
        for row in &inner.outbox {
            match row.record.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Dispatched => counts.dispatched += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn items_total(&self) -> StoreResult<i64> {
        let inner = self.inner.lock();
        Self::check_up(&inner)?;
        Ok(inner.items.len() as i64)
    }
}
