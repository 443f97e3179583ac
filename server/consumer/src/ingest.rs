use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use bs_broker::{BrokerResult, InboundMessage, MessageSource};
use bs_metrics::{ActivityCounter, ConsumerMetrics};
use bs_store::{IndexStore, ItemEvent, ItemEventKind};

#[derive(Clone, Debug)]
pub struct IngestorConfig {
    pub base_backoff: Duration,
    pub backoff_cap: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

enum Wake {
    Delivery(BrokerResult<Option<InboundMessage>>),
    Refresh,
}

/// Applies queue deliveries to the index store, acking only after the apply
/// succeeded. Delivery is at-least-once, so every apply path is idempotent.
pub struct Ingestor<S, I> {
    source: S,
    index: I,
    cfg: IngestorConfig,
    conn: super::ConnectionHandle,
    stats: Arc<ActivityCounter>,
    metrics: ConsumerMetrics,
}

impl<S: MessageSource, I: IndexStore> Ingestor<S, I> {
    pub fn new(source: S, index: I, cfg: IngestorConfig) -> Self {
        Self {
            source,
            index,
            cfg,
            conn: super::ConnectionHandle::new(),
            stats: Arc::new(ActivityCounter::new()),
            metrics: ConsumerMetrics::new("bs"),
        }
    }

    pub fn connection(&self) -> super::ConnectionHandle {
        self.conn.clone()
    }

    pub fn stats(&self) -> Arc<ActivityCounter> {
        self.stats.clone()
    }

    pub async fn run(&mut self) -> Result<()> {
        self.conn.set(super::ConnectionState::Consuming);
        info!("consumer ingest loop started");

        loop {
            let wake = {
                let conn = self.conn.clone();
                tokio::select! {
                    next = self.source.next() => Wake::Delivery(next),
                    _ = conn.refresh_requested() => Wake::Refresh,
                }
            };

            match wake {
                Wake::Delivery(Ok(Some(msg))) => {
                    if let Err(e) = self.apply(msg).await {
                        warn!("broker error mid-message: {e}");
                        self.conn.set(super::ConnectionState::Disconnected);
                        self.reconnect().await;
                    }
                }
                Wake::Delivery(Ok(None)) => {
                    // Silent connection drop: the stream just ends.
                    warn!("subscription ended, supervising reconnect");
                    self.conn.set(super::ConnectionState::Degraded);
                    self.reconnect().await;
                }
                Wake::Delivery(Err(e)) => {
                    warn!("transport error: {e}");
                    self.conn.set(super::ConnectionState::Disconnected);
                    self.reconnect().await;
                }
                Wake::Refresh => {
                    info!("manual reconnect requested");
                    self.conn.set(super::ConnectionState::Degraded);
                    self.reconnect().await;
                }
            }
        }
    }

    async fn apply(&mut self, msg: InboundMessage) -> BrokerResult<()> {
        let started = Instant::now();

        let event = match ItemEvent::from_bytes(&msg.payload) {
            Ok(ev) => ev,
            Err(e) => {
                // Terminal for this message: park it, never requeue it.
                warn!(tag = msg.delivery_tag, "malformed payload, dead-lettering: {e}");
                self.metrics.dead_lettered();
                self.source.publish_dead_letter(&msg.payload).await?;
                self.source.ack(msg.delivery_tag).await?;
                return Ok(());
            }
        };

        let applied = match event.kind {
            ItemEventKind::Created | ItemEventKind::Updated => {
                self.index.upsert(&event.document(Utc::now())).await
            }
            ItemEventKind::Deleted => self.index.remove(event.item_id).await,
        };

        match applied {
            Ok(()) => {
                // Ack only now: a crash before this point redelivers.
                self.source.ack(msg.delivery_tag).await?;
                self.stats.add(1);
                self.metrics.consumed();
                self.metrics.apply_seconds(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(tag = msg.delivery_tag, item = %event.item_id, "index unavailable, requeueing: {e}");
                self.metrics.requeued();
                self.source.nack_requeue(msg.delivery_tag).await?;
                sleep(self.cfg.base_backoff).await;
            }
        }
        Ok(())
    }

    async fn reconnect(&mut self) {
        let mut delay = self.cfg.base_backoff;
        loop {
            self.conn.set(super::ConnectionState::Connecting);
            match self.source.reconnect().await {
                Ok(()) => {
                    self.metrics.reconnects();
                    self.conn.set(super::ConnectionState::Consuming);
                    info!("subscription re-established");
                    return;
                }
                Err(e) => {
                    warn!(retry_ms = delay.as_millis() as u64, "reconnect failed: {e}");
                    self.conn.set(super::ConnectionState::Degraded);
                    let conn = self.conn.clone();
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = conn.refresh_requested() => {
                            info!("manual reconnect override");
                        }
                    }
                    delay = (delay * 2).min(self.cfg.backoff_cap);
                }
            }
        }
    }
}
