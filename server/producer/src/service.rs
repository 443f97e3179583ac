use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use bs_metrics::{ActivityCounter, ProducerMetrics};
use bs_store::{ItemId, ItemsRepo, NewAuctionItem, StoreResult};

/// Generates auction items; every item lands together with its outbox row in
/// one storage transaction.
pub struct ItemsProducer<R> {
    repo: R,
    stats: Arc<ActivityCounter>,
    metrics: ProducerMetrics,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ProducerInfo {
    pub items_produced: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl<R: ItemsRepo> ItemsProducer<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            stats: Arc::new(ActivityCounter::new()),
            metrics: ProducerMetrics::new("bs"),
        }
    }

    pub async fn generate_items(&self, count: usize) -> StoreResult<Vec<ItemId>> {
        let mut created = Vec::with_capacity(count);

        for _ in 0..count {
            let lot = random_lot();
            let started = Instant::now();
            match self.repo.create_item(&lot).await {
                Ok(item) => {
                    self.metrics.db_seconds(started.elapsed().as_secs_f64());
                    created.push(item.id);
                }
                Err(e) => {
                    // Items created so far are committed and will flow through
                    // the pipeline; the failing one left no partial state.
                    self.metrics.create_failed();
                    warn!(created = created.len(), requested = count, "item creation aborted: {e}");
                    self.stats.add(created.len() as u64);
                    self.metrics.items_produced(created.len() as u64);
                    return Err(e);
                }
            }
        }

        self.stats.add(created.len() as u64);
        self.metrics.items_produced(created.len() as u64);
        info!(count = created.len(), "items produced");
        Ok(created)
    }

    pub fn info(&self) -> ProducerInfo {
        ProducerInfo {
            items_produced: self.stats.count(),
            last_update: self.stats.last_update(),
        }
    }
}

const ADJECTIVES: &[&str] = &[
    "Victorian", "Art-deco", "Mid-century", "Brutalist", "Baroque", "Rustic", "Gilded",
];

const OBJECTS: &[&str] = &[
    "writing desk", "pocket watch", "oil painting", "oak bookcase", "silver tray",
    "gramophone", "porcelain vase", "brass telescope",
];

fn random_lot() -> NewAuctionItem {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let object = OBJECTS[rng.gen_range(0..OBJECTS.len())];
    let lot_no: u32 = rng.gen_range(1000..10_000);

    NewAuctionItem {
        title: format!("{adjective} {object} (lot {lot_no})"),
        description: format!("Auction lot {lot_no}: {adjective} {object}."),
        price_cents: i64::from(rng.gen_range(1..=100)) * 100,
    }
}
