use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    errors::StoreResult,
    ids::{ItemId, OutboxId},
    model::{AuctionItem, ItemEvent, NewAuctionItem, OutboxCounts, OutboxRecord, OutboxStatus},
};

#[async_trait]
pub trait ItemsRepo: Send + Sync {
    // Producer side: item + outbox row commit or roll back together.
    async fn create_item(&self, item: &NewAuctionItem) -> StoreResult<AuctionItem>;

    // Relay side.
    async fn claim_pending(&self, claim_token: Uuid, limit: i64) -> StoreResult<Vec<OutboxRecord>>;
    async fn mark_dispatched(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64>;
    async fn mark_failed(&self, id: OutboxId, claim_token: Uuid) -> StoreResult<bool>;
    async fn release_claims(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64>;

    // Observability.
    async fn outbox_counts(&self) -> StoreResult<OutboxCounts>;
    async fn items_total(&self) -> StoreResult<i64>;
}

#[derive(Clone)]
pub struct PgItemsRepo {
    pool: PgPool,
    claim_ttl: Duration,
}

impl PgItemsRepo {
    pub fn new(pool: PgPool, claim_ttl: Duration) -> Self {
        Self { pool, claim_ttl }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(r: &sqlx::postgres::PgRow) -> StoreResult<OutboxRecord> {
    Ok(OutboxRecord {
        id: OutboxId(r.get::<i64, _>("id")),
        item_id: ItemId(r.get::<Uuid, _>("item_id")),
        payload: r.get::<Json, _>("payload"),
        status: OutboxStatus::parse(&r.get::<String, _>("status"))?,
        attempts: r.get::<i32, _>("attempts"),
        created_at: r.get::<DateTime<Utc>, _>("created_at"),
        dispatched_at: r.get::<Option<DateTime<Utc>>, _>("dispatched_at"),
    })
}

#[async_trait]
impl ItemsRepo for PgItemsRepo {
    async fn create_item(&self, item: &NewAuctionItem) -> StoreResult<AuctionItem> {
        let created = AuctionItem {
            id: ItemId::new(),
            title: item.title.clone(),
            description: item.description.clone(),
            price_cents: item.price_cents,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO auction_items (id, title, description, price_cents, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(created.id.0)
        .bind(&created.title)
        .bind(&created.description)
        .bind(created.price_cents)
        .bind(created.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO outbox_records (item_id, payload, status, created_at)
            VALUES ($1, $2, 'pending', $3)
            "#,
        )
        .bind(created.id.0)
        .bind(ItemEvent::created(&created).to_payload())
        .bind(created.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    // -------------------------
    // Outbox claim protocol
    // -------------------------

    async fn claim_pending(&self, claim_token: Uuid, limit: i64) -> StoreResult<Vec<OutboxRecord>> {
        // SKIP LOCKED keeps concurrent relay instances off each other's rows;
        // a stale lease (claimed_at older than the TTL) is reclaimable.
        let rows = sqlx::query(
            r#"
            WITH eligible AS (
              SELECT id
              FROM outbox_records
              WHERE status = 'pending'
                AND (claim_token IS NULL OR claimed_at < NOW() - make_interval(secs => $3))
              ORDER BY id ASC
              FOR UPDATE SKIP LOCKED
              LIMIT $1
            ),
            claimed AS (
              UPDATE outbox_records o
              SET claim_token = $2, claimed_at = NOW(), attempts = o.attempts + 1
              FROM eligible
              WHERE o.id = eligible.id
              RETURNING o.id, o.item_id, o.payload, o.status, o.attempts,
                        o.created_at, o.dispatched_at
            )
            SELECT * FROM claimed ORDER BY id ASC
            "#,
        )
        .bind(limit)
        .bind(claim_token)
        .bind(self.claim_ttl.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(record_from_row(&r)?);
        }
        Ok(out)
    }

    async fn mark_dispatched(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();

        // Token check: rows reclaimed by another instance after lease expiry
        // must not be acknowledged by the stale claimant.
        let res = sqlx::query(
            r#"
            UPDATE outbox_records
            SET status = 'dispatched', dispatched_at = NOW(),
                claim_token = NULL, claimed_at = NULL
            WHERE id = ANY($1)
              AND claim_token = $2
              AND status = 'pending'
            "#,
        )
        .bind(&raw)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn mark_failed(&self, id: OutboxId, claim_token: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_records
            SET status = 'failed', claim_token = NULL, claimed_at = NULL
            WHERE id = $1
              AND claim_token = $2
              AND status = 'pending'
            "#,
        )
        .bind(id.0)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn release_claims(&self, ids: &[OutboxId], claim_token: Uuid) -> StoreResult<u64> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();

        // Gives unpublished rows back before the lease runs out, so the next
        // poll cycle can retry them immediately.
        let res = sqlx::query(
            r#"
            UPDATE outbox_records
            SET claim_token = NULL, claimed_at = NULL
            WHERE id = ANY($1)
              AND claim_token = $2
              AND status = 'pending'
            "#,
        )
        .bind(&raw)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    // -------------------------
    // Observability
    // -------------------------

    async fn outbox_counts(&self) -> StoreResult<OutboxCounts> {
        let row = sqlx::query(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE status = 'pending') AS pending,
              COUNT(*) FILTER (WHERE status = 'dispatched') AS dispatched,
              COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM outbox_records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxCounts {
            pending: row.get::<i64, _>("pending"),
            dispatched: row.get::<i64, _>("dispatched"),
            failed: row.get::<i64, _>("failed"),
        })
    }

    async fn items_total(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM auction_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("cnt"))
    }
}
