use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    error::{BrokerError, BrokerResult},
    publisher::EventPublisher,
    source::{InboundMessage, MessageSource},
};

/// In-process broker with the same delivery contract as the AMQP adapter:
/// durable FIFO queue, explicit ack/nack, redelivery of unacked messages on
/// reconnect. Drives the relay and consumer loop tests.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    inner: Mutex<Queue>,
    notify: Notify,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<(u64, Vec<u8>)>,
    unacked: HashMap<u64, Vec<u8>>,
    dead_letters: Vec<Vec<u8>>,
    published: Vec<Vec<u8>>,
    next_tag: u64,
    down: bool,
    reject_publishes: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            broker: self.clone(),
        }
    }

    /// Simulate a broker outage. Blocked `next()` calls observe a silent
    /// connection drop and return `None`.
    pub fn set_down(&self, down: bool) {
        self.state.inner.lock().down = down;
        self.state.notify.notify_waiters();
    }

    /// Make the broker refuse publishes with a negative confirm.
    pub fn set_reject_publishes(&self, reject: bool) {
        self.state.inner.lock().reject_publishes = reject;
    }

    /// Every payload the broker has accepted, in publish order. Duplicates
    /// from redelivery-after-crash show up here twice.
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.inner.lock().published.clone()
    }

    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state.inner.lock().dead_letters.clone()
    }

    pub fn queued_len(&self) -> usize {
        self.state.inner.lock().ready.len()
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, payload: &[u8]) -> BrokerResult<()> {
        {
            let mut q = self.state.inner.lock();
            if q.down {
                return Err(BrokerError::Unavailable("broker down".into()));
            }
            if q.reject_publishes {
                return Err(BrokerError::Rejected("refused by test broker".into()));
            }
            let tag = q.next_tag;
            q.next_tag += 1;
            q.published.push(payload.to_vec());
            q.ready.push_back((tag, payload.to_vec()));
        }
        self.state.notify.notify_waiters();
        Ok(())
    }
}

/// Subscription handle onto a [`MemoryBroker`].
pub struct MemorySource {
    broker: MemoryBroker,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next(&mut self) -> BrokerResult<Option<InboundMessage>> {
        loop {
            let notified = self.broker.state.notify.notified();
            {
                let mut q = self.broker.state.inner.lock();
                if q.down {
                    return Ok(None);
                }
                if let Some((tag, payload)) = q.ready.pop_front() {
                    q.unacked.insert(tag, payload.clone());
                    return Ok(Some(InboundMessage {
                        delivery_tag: tag,
                        payload,
                    }));
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        let mut q = self.broker.state.inner.lock();
        if q.down {
            return Err(BrokerError::Unavailable("broker down".into()));
        }
        q.unacked.remove(&delivery_tag);
        Ok(())
    }

    async fn nack_requeue(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        let mut q = self.broker.state.inner.lock();
        if q.down {
            return Err(BrokerError::Unavailable("broker down".into()));
        }
        if let Some(payload) = q.unacked.remove(&delivery_tag) {
            q.ready.push_front((delivery_tag, payload));
        }
        drop(q);
        self.broker.state.notify.notify_waiters();
        Ok(())
    }

    async fn publish_dead_letter(&mut self, payload: &[u8]) -> BrokerResult<()> {
        let mut q = self.broker.state.inner.lock();
        if q.down {
            return Err(BrokerError::Unavailable("broker down".into()));
        }
        q.dead_letters.push(payload.to_vec());
        Ok(())
    }

    async fn reconnect(&mut self) -> BrokerResult<()> {
        let mut q = self.broker.state.inner.lock();
        if q.down {
            return Err(BrokerError::Unavailable("broker down".into()));
        }
        // The broker requeues whatever the lost connection never acked.
        let mut stranded: Vec<(u64, Vec<u8>)> = q.unacked.drain().collect();
        stranded.sort_by_key(|(tag, _)| *tag);
        for entry in stranded.into_iter().rev() {
            q.ready.push_front(entry);
        }
        drop(q);
        self.broker.state.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let broker = MemoryBroker::new();
        let mut source = broker.source();

        broker.publish(b"one").await.unwrap();
        broker.publish(b"two").await.unwrap();

        let a = source.next().await.unwrap().unwrap();
        let b = source.next().await.unwrap().unwrap();
        assert_eq!(a.payload, b"one");
        assert_eq!(b.payload, b"two");
    }

    #[tokio::test]
    async fn nack_redelivers_ack_retires() {
        let broker = MemoryBroker::new();
        let mut source = broker.source();
        broker.publish(b"flaky").await.unwrap();

        let first = source.next().await.unwrap().unwrap();
        source.nack_requeue(first.delivery_tag).await.unwrap();

        let second = source.next().await.unwrap().unwrap();
        assert_eq!(second.payload, b"flaky");
        source.ack(second.delivery_tag).await.unwrap();

        // Nothing left: next() should block until timeout.
        let idle = timeout(Duration::from_millis(50), source.next()).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn reconnect_requeues_unacked_only() {
        let broker = MemoryBroker::new();
        let mut source = broker.source();
        broker.publish(b"acked").await.unwrap();
        broker.publish(b"inflight").await.unwrap();

        let first = source.next().await.unwrap().unwrap();
        source.ack(first.delivery_tag).await.unwrap();
        let _second = source.next().await.unwrap().unwrap();

        // Connection lost with one message unacked.
        source.reconnect().await.unwrap();
        let redelivered = source.next().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, b"inflight");

        let idle = timeout(Duration::from_millis(50), source.next()).await;
        assert!(idle.is_err(), "acked message must not come back");
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable_and_silent_drop() {
        let broker = MemoryBroker::new();
        let mut source = broker.source();

        broker.set_down(true);
        let err = broker.publish(b"lost?").await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert!(source.next().await.unwrap().is_none());

        broker.set_down(false);
        broker.publish(b"recovered").await.unwrap();
        let msg = source.next().await.unwrap().unwrap();
        assert_eq!(msg.payload, b"recovered");
    }
}
