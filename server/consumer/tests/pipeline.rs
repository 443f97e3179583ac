//! End-to-end pipeline tests: producer-side inserts -> outbox relay ->
//! broker -> consumer -> index projection, all on the in-memory adapters.

use std::time::{Duration, Instant};

use tokio::time::sleep;

use bs_broker::{EventPublisher, MemoryBroker};
use bs_consumer::ingest::{Ingestor, IngestorConfig};
use bs_relay::dispatch::{Relay, RelayConfig};
use bs_store::{IndexStore, ItemId, ItemsRepo, MemoryIndexStore, MemoryItemsRepo, NewAuctionItem};

fn relay_cfg() -> RelayConfig {
    RelayConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 25,
        publish_timeout: Duration::from_millis(200),
        max_attempts: 25,
        backoff_cap: Duration::from_millis(50),
    }
}

fn ingest_cfg() -> IngestorConfig {
    IngestorConfig {
        base_backoff: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(20),
    }
}

async fn produce(repo: &MemoryItemsRepo, n: usize) -> Vec<ItemId> {
    let mut ids = Vec::new();
    for i in 0..n {
        let item = repo
            .create_item(&NewAuctionItem {
                title: format!("Lot {i}"),
                description: "pipeline test".into(),
                price_cents: 1_500,
            })
            .await
            .unwrap();
        ids.push(item.id);
    }
    ids
}

async fn wait_until<F: Fn() -> bool>(cond: F, millis: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(millis);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn ten_items_flow_from_outbox_to_index() {
    let repo = MemoryItemsRepo::new(Duration::from_secs(30));
    let broker = MemoryBroker::new();
    let index = MemoryIndexStore::new();

    let ids = produce(&repo, 10).await;
    assert_eq!(repo.outbox_counts().await.unwrap().pending, 10);

    let mut ingestor = Ingestor::new(broker.source(), index.clone(), ingest_cfg());
    let consumed = ingestor.stats();
    tokio::spawn(async move {
        let _ = ingestor.run().await;
    });

    let relay = Relay::new(repo.clone(), broker.clone(), relay_cfg());
    let report = relay.dispatch_once().await.unwrap();
    assert_eq!(report.dispatched, 10);
    assert_eq!(relay.stats().count(), 10);

    assert!(wait_until(|| consumed.count() == 10, 2_000).await);
    assert_eq!(index.count().await.unwrap(), 10);
    for id in ids {
        assert!(index.get(id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn broker_outage_holds_records_then_drains_after_restart() {
    let repo = MemoryItemsRepo::new(Duration::from_secs(30));
    let broker = MemoryBroker::new();
    let index = MemoryIndexStore::new();

    broker.set_down(true);
    produce(&repo, 5).await;

    let relay = Relay::new(repo.clone(), broker.clone(), relay_cfg());
    let report = relay.dispatch_once().await.unwrap();
    assert!(report.broker_unavailable);

    // The whole outage leaves every record pending; nothing is lost.
    assert_eq!(repo.outbox_counts().await.unwrap().pending, 5);

    broker.set_down(false);
    let mut ingestor = Ingestor::new(broker.source(), index.clone(), ingest_cfg());
    let consumed = ingestor.stats();
    tokio::spawn(async move {
        let _ = ingestor.run().await;
    });

    // One poll cycle after restart drains the backlog.
    let report = relay.dispatch_once().await.unwrap();
    assert_eq!(report.dispatched, 5);
    assert_eq!(repo.outbox_counts().await.unwrap().dispatched, 5);

    assert!(wait_until(|| consumed.count() == 5, 2_000).await);
    assert_eq!(index.count().await.unwrap(), 5);
}

#[tokio::test]
async fn duplicate_publish_after_relay_crash_converges_in_index() {
    let repo = MemoryItemsRepo::new(Duration::from_secs(30));
    let broker = MemoryBroker::new();
    let index = MemoryIndexStore::new();

    let ids = produce(&repo, 1).await;

    // Crashed relay: published but never marked dispatched.
    let crashed = uuid::Uuid::new_v4();
    let batch = repo.claim_pending(crashed, 10).await.unwrap();
    let bytes = serde_json::to_vec(&batch[0].payload).unwrap();
    broker.publish(&bytes).await.unwrap();
    repo.expire_claims();

    // Replacement relay republishes; the consumer sees the event twice.
    let relay = Relay::new(repo.clone(), broker.clone(), relay_cfg());
    relay.dispatch_once().await.unwrap();
    assert_eq!(broker.published().len(), 2);

    let mut ingestor = Ingestor::new(broker.source(), index.clone(), ingest_cfg());
    let consumed = ingestor.stats();
    tokio::spawn(async move {
        let _ = ingestor.run().await;
    });

    assert!(wait_until(|| consumed.count() == 2, 2_000).await);
    assert_eq!(index.count().await.unwrap(), 1, "idempotent upsert absorbs the duplicate");
    assert!(index.get(ids[0]).await.unwrap().is_some());
}
