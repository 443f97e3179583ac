use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{errors::StoreResult, ids::ItemId, model::ItemDocument};

/// Searchable projection store. Every operation is idempotent: re-applying
/// the same document (or the same removal) leaves the store unchanged.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn upsert(&self, doc: &ItemDocument) -> StoreResult<()>;
    async fn remove(&self, id: ItemId) -> StoreResult<()>;
    async fn get(&self, id: ItemId) -> StoreResult<Option<ItemDocument>>;
    async fn search(&self, term: &str, limit: i64) -> StoreResult<Vec<ItemDocument>>;
    async fn count(&self) -> StoreResult<i64>;
}

#[derive(Clone)]
pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn doc_from_row(r: &sqlx::postgres::PgRow) -> StoreResult<ItemDocument> {
    Ok(serde_json::from_value(r.get::<Json, _>("document"))?)
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn upsert(&self, doc: &ItemDocument) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO item_documents (item_id, document, indexed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (item_id)
            DO UPDATE SET
              document = EXCLUDED.document,
              indexed_at = EXCLUDED.indexed_at
            "#,
        )
        .bind(doc.item_id.0)
        .bind(serde_json::to_value(doc)?)
        .bind(doc.indexed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: ItemId) -> StoreResult<()> {
        sqlx::query("DELETE FROM item_documents WHERE item_id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: ItemId) -> StoreResult<Option<ItemDocument>> {
        let row = sqlx::query("SELECT document FROM item_documents WHERE item_id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(doc_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn search(&self, term: &str, limit: i64) -> StoreResult<Vec<ItemDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT document
            FROM item_documents
            WHERE document->>'title' ILIKE '%' || $1 || '%'
               OR document->>'description' ILIKE '%' || $1 || '%'
            ORDER BY indexed_at DESC
            LIMIT $2
            "#,
        )
        .bind(term)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(doc_from_row(&r)?);
        }
        Ok(out)
    }

    async fn count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM item_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("cnt"))
    }
}

/// In-memory index for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryIndexStore {
    docs: Arc<RwLock<HashMap<Uuid, ItemDocument>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn upsert(&self, doc: &ItemDocument) -> StoreResult<()> {
        self.docs.write().insert(doc.item_id.0, doc.clone());
        Ok(())
    }

    async fn remove(&self, id: ItemId) -> StoreResult<()> {
        self.docs.write().remove(&id.0);
        Ok(())
    }

    async fn get(&self, id: ItemId) -> StoreResult<Option<ItemDocument>> {
        Ok(self.docs.read().get(&id.0).cloned())
    }

    async fn search(&self, term: &str, limit: i64) -> StoreResult<Vec<ItemDocument>> {
        let needle = term.to_lowercase();
        let docs = self.docs.read();
        let mut out: Vec<ItemDocument> = docs
            .values()
            .filter(|d| {
                d.title.to_lowercase().contains(&needle)
                    || d.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.indexed_at.cmp(&a.indexed_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.docs.read().len() as i64)
    }
}
