use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use bs_broker::{BrokerError, EventPublisher};
use bs_metrics::{ActivityCounter, RelayMetrics};
use bs_store::{ItemsRepo, OutboxId, OutboxRecord, StoreResult};

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub publish_timeout: Duration,
    pub max_attempts: i32,
    pub backoff_cap: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 25,
            publish_timeout: Duration::from_secs(5),
            max_attempts: 25,
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// One poll cycle's outcome.
#[derive(Clone, Copy, Debug, Default)]
pub struct CycleReport {
    pub claimed: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub broker_unavailable: bool,
}

enum PublishFailure {
    Unavailable(String),
    Timeout,
    Rejected(String),
}

/// Drains the outbox: claim a batch under this instance's token, publish in
/// id order, mark rows dispatched only after the broker confirms.
pub struct Relay<R, P> {
    repo: R,
    publisher: P,
    cfg: RelayConfig,
    token: Uuid,
    stats: Arc<ActivityCounter>,
    metrics: RelayMetrics,
}

impl<R: ItemsRepo, P: EventPublisher> Relay<R, P> {
    pub fn new(repo: R, publisher: P, cfg: RelayConfig) -> Self {
        Self {
            repo,
            publisher,
            cfg,
            token: Uuid::new_v4(),
            stats: Arc::new(ActivityCounter::new()),
            metrics: RelayMetrics::new("bs"),
        }
    }

    pub fn stats(&self) -> Arc<ActivityCounter> {
        self.stats.clone()
    }

    pub async fn run(&self) -> Result<()> {
        info!(claim_token = %self.token, "outbox relay started");
        let mut backoff = self.cfg.poll_interval;

        loop {
            match self.dispatch_once().await {
                Ok(report) => {
                    if report.broker_unavailable {
                        warn!(backoff_ms = backoff.as_millis() as u64, "broker unavailable, backing off");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(self.cfg.backoff_cap);
                        continue;
                    }
                    backoff = self.cfg.poll_interval;
                    if report.claimed as i64 >= self.cfg.batch_size {
                        // Full batch: more rows are probably waiting.
                        continue;
                    }
                }
                Err(e) => {
                    warn!("outbox cycle error: {e:#}");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.cfg.backoff_cap);
                    continue;
                }
            }
            sleep(self.cfg.poll_interval).await;
        }
    }

    /// Claim-publish-ack for a single batch. Split out of [`run`] so tests can
    /// drive cycles without a timer.
    pub async fn dispatch_once(&self) -> StoreResult<CycleReport> {
        let batch = self.repo.claim_pending(self.token, self.cfg.batch_size).await?;
        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };
        let mut unpublished: Vec<OutboxId> = Vec::new();

        for (i, rec) in batch.iter().enumerate() {
            match self.publish_record(rec).await {
                Ok(()) => {
                    let acked = self.repo.mark_dispatched(&[rec.id], self.token).await?;
                    if acked == 1 {
                        report.dispatched += 1;
                        self.stats.add(1);
                        self.metrics.dispatched(1);
                        let lag = (Utc::now() - rec.created_at).num_milliseconds();
                        self.metrics.outbox_lag_seconds((lag.max(0) as f64) / 1000.0);
                    } else {
                        // Lease expired mid-flight; the new claimant owns the
                        // record now and the broker dedupes nothing -- this is
                        // the at-least-once path.
                        warn!(id = %rec.id, "lease lost before ack, skipping mark");
                    }
                }
                Err(PublishFailure::Rejected(reason)) => {
                    self.metrics.publish_failed("rejected");
                    if rec.attempts >= self.cfg.max_attempts {
                        if self.repo.mark_failed(rec.id, self.token).await? {
                            report.failed += 1;
                            self.metrics.dead_lettered();
                            error!(id = %rec.id, attempts = rec.attempts, %reason, "record exhausted attempts, marked failed");
                        }
                    } else {
                        warn!(id = %rec.id, attempts = rec.attempts, %reason, "broker rejected record, will retry");
                        unpublished.push(rec.id);
                    }
                }
                Err(PublishFailure::Timeout) => {
                    self.metrics.publish_failed("timeout");
                    warn!(id = %rec.id, "publish confirmation timed out, records stay pending");
                    report.broker_unavailable = true;
                    unpublished.extend(batch[i..].iter().map(|r| r.id));
                    break;
                }
                Err(PublishFailure::Unavailable(reason)) => {
                    self.metrics.publish_failed("unavailable");
                    warn!(id = %rec.id, %reason, "publish failed, records stay pending");
                    report.broker_unavailable = true;
                    unpublished.extend(batch[i..].iter().map(|r| r.id));
                    break;
                }
            }
        }

        if !unpublished.is_empty() {
            // Hand unpublished rows back immediately instead of letting the
            // lease run out, so the next cycle retries them.
            self.repo.release_claims(&unpublished, self.token).await?;
        }
        Ok(report)
    }

    async fn publish_record(&self, rec: &OutboxRecord) -> Result<(), PublishFailure> {
        let bytes = serde_json::to_vec(&rec.payload)
            .map_err(|e| PublishFailure::Rejected(e.to_string()))?;

        match timeout(self.cfg.publish_timeout, self.publisher.publish(&bytes)).await {
            Err(_) => Err(PublishFailure::Timeout),
            Ok(Err(BrokerError::Unavailable(e))) => Err(PublishFailure::Unavailable(e)),
            Ok(Err(BrokerError::Rejected(e))) => Err(PublishFailure::Rejected(e)),
            Ok(Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bs_broker::MemoryBroker;
    use bs_store::{ItemEvent, MemoryItemsRepo, NewAuctionItem};

    fn test_cfg() -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 25,
            publish_timeout: Duration::from_millis(200),
            max_attempts: 25,
            backoff_cap: Duration::from_millis(50),
        }
    }

    async fn seed(repo: &MemoryItemsRepo, n: usize) -> Vec<bs_store::ItemId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let item = repo
                .create_item(&NewAuctionItem {
                    title: format!("Lot {i}"),
                    description: "seed".into(),
                    price_cents: 500,
                })
                .await
                .unwrap();
            ids.push(item.id);
        }
        ids
    }

    #[tokio::test]
    async fn dispatches_full_outbox_in_insertion_order() {
        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        let broker = MemoryBroker::new();
        let ids = seed(&repo, 10).await;

        let relay = Relay::new(repo.clone(), broker.clone(), test_cfg());
        let report = relay.dispatch_once().await.unwrap();

        assert_eq!(report.claimed, 10);
        assert_eq!(report.dispatched, 10);
        assert!(!report.broker_unavailable);
        assert_eq!(relay.stats().count(), 10);

        let counts = repo.outbox_counts().await.unwrap();
        assert_eq!(counts.dispatched, 10);
        assert_eq!(counts.pending, 0);

        let published: Vec<bs_store::ItemId> = broker
            .published()
            .iter()
            .map(|bytes| ItemEvent::from_bytes(bytes).unwrap().item_id)
            .collect();
        assert_eq!(published, ids);
    }

    #[tokio::test]
    async fn broker_outage_leaves_every_record_pending() {
        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        let broker = MemoryBroker::new();
        seed(&repo, 5).await;
        broker.set_down(true);

        let relay = Relay::new(repo.clone(), broker.clone(), test_cfg());
        let report = relay.dispatch_once().await.unwrap();
        assert!(report.broker_unavailable);
        assert_eq!(report.dispatched, 0);

        let counts = repo.outbox_counts().await.unwrap();
        assert_eq!(counts.pending, 5);
        assert!(broker.published().is_empty());

        // Broker comes back: the very next cycle drains the backlog.
        broker.set_down(false);
        let report = relay.dispatch_once().await.unwrap();
        assert_eq!(report.dispatched, 5);
        assert_eq!(repo.outbox_counts().await.unwrap().dispatched, 5);
    }

    #[tokio::test]
    async fn crash_between_publish_and_ack_yields_one_duplicate() {
        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        let broker = MemoryBroker::new();
        seed(&repo, 1).await;

        // A relay that died after the broker confirmed but before the mark:
        // claim + publish with a token that never acks.
        let crashed = Uuid::new_v4();
        let batch = repo.claim_pending(crashed, 10).await.unwrap();
        let bytes = serde_json::to_vec(&batch[0].payload).unwrap();
        broker.publish(&bytes).await.unwrap();

        // Lease expires; a fresh relay picks the record up again.
        repo.expire_claims();
        let relay = Relay::new(repo.clone(), broker.clone(), test_cfg());
        let report = relay.dispatch_once().await.unwrap();
        assert_eq!(report.dispatched, 1);

        // Exactly one duplicate publish, and the record is dispatched once.
        assert_eq!(broker.published().len(), 2);
        let counts = repo.outbox_counts().await.unwrap();
        assert_eq!(counts.dispatched, 1);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn rejected_record_fails_after_attempts_budget() {
        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        let broker = MemoryBroker::new();
        seed(&repo, 1).await;
        broker.set_reject_publishes(true);

        let mut cfg = test_cfg();
        cfg.max_attempts = 2;
        let relay = Relay::new(repo.clone(), broker.clone(), cfg);

        // First rejection: attempts budget not yet exhausted.
        let report = relay.dispatch_once().await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(repo.outbox_counts().await.unwrap().pending, 1);

        // Second rejection crosses max_attempts: terminal failure.
        let report = relay.dispatch_once().await.unwrap();
        assert_eq!(report.failed, 1);
        let counts = repo.outbox_counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn concurrent_relays_never_dispatch_the_same_record() {
        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        let broker = MemoryBroker::new();
        seed(&repo, 6).await;

        let mut cfg = test_cfg();
        cfg.batch_size = 3;
        let a = Relay::new(repo.clone(), broker.clone(), cfg.clone());
        let b = Relay::new(repo.clone(), broker.clone(), cfg);

        let (ra, rb) = tokio::join!(a.dispatch_once(), b.dispatch_once());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.dispatched + rb.dispatched, 6);
        assert_eq!(broker.published().len(), 6);

        let counts = repo.outbox_counts().await.unwrap();
        assert_eq!(counts.dispatched, 6);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn publish_timeout_is_treated_as_broker_unavailable() {
        struct StuckPublisher;

        #[async_trait::async_trait]
        impl EventPublisher for StuckPublisher {
            async fn publish(&self, _payload: &[u8]) -> bs_broker::BrokerResult<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let repo = MemoryItemsRepo::new(Duration::from_secs(30));
        seed(&repo, 1).await;

        let mut cfg = test_cfg();
        cfg.publish_timeout = Duration::from_millis(20);
        let relay = Relay::new(repo.clone(), StuckPublisher, cfg);

        let report = relay.dispatch_once().await.unwrap();
        assert!(report.broker_unavailable);
        assert_eq!(repo.outbox_counts().await.unwrap().pending, 1);
    }
}
