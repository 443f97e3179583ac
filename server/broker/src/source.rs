use async_trait::async_trait;

use crate::error::BrokerResult;

/// A message delivered from the queue, not yet acknowledged.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
}

/// Inbound half of the broker contract: an at-least-once subscription with
/// explicit ack/nack. Unacked messages are redelivered after a nack or a
/// connection loss.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery. `Ok(None)` means the subscription ended (connection
    /// dropped or closed); the caller decides whether to reconnect.
    async fn next(&mut self) -> BrokerResult<Option<InboundMessage>>;

    /// Acknowledge after the message has been fully applied downstream.
    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()>;

    /// Return the message to the queue for redelivery.
    async fn nack_requeue(&mut self, delivery_tag: u64) -> BrokerResult<()>;

    /// Park an unprocessable message on the dead-letter queue.
    async fn publish_dead_letter(&mut self, payload: &[u8]) -> BrokerResult<()>;

    /// Tear down and re-establish the subscription.
    async fn reconnect(&mut self) -> BrokerResult<()>;
}
