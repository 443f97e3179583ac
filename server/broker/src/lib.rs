pub mod amqp;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod source;

pub use amqp::{AmqpConfig, AmqpPublisher, AmqpSource};
pub use error::{BrokerError, BrokerResult};
pub use memory::{MemoryBroker, MemorySource};
pub use publisher::EventPublisher;
pub use source::{InboundMessage, MessageSource};
