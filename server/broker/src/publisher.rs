use async_trait::async_trait;

use crate::error::BrokerResult;

/// Outbound half of the broker contract.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one serialized event to the configured queue. Resolves only
    /// after the broker has confirmed the message is durably enqueued.
    async fn publish(&self, payload: &[u8]) -> BrokerResult<()>;
}
