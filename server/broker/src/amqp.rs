use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::{debug, info, warn};

use crate::{
    error::{BrokerError, BrokerResult},
    publisher::EventPublisher,
    source::{InboundMessage, MessageSource},
};

const PERSISTENT: u8 = 2;

#[derive(Clone, Debug)]
pub struct AmqpConfig {
    pub url: String,
    pub queue: String,
}

impl AmqpConfig {
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead-letter", self.queue)
    }
}

async fn open_channel(cfg: &AmqpConfig) -> BrokerResult<(Connection, Channel)> {
    let conn = Connection::connect(&cfg.url, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;

    let durable = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };
    channel
        .queue_declare(&cfg.queue, durable, FieldTable::default())
        .await?;
    channel
        .queue_declare(&cfg.dead_letter_queue(), durable, FieldTable::default())
        .await?;

    Ok((conn, channel))
}

/// AMQP publisher with publisher confirms: `publish` resolves only once the
/// broker has taken responsibility for the message.
pub struct AmqpPublisher {
    _connection: Connection,
    channel: Channel,
    queue: String,
}

impl AmqpPublisher {
    pub async fn connect(cfg: &AmqpConfig) -> BrokerResult<Self> {
        let (conn, channel) = open_channel(cfg).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!(queue = %cfg.queue, "amqp publisher connected");
        Ok(Self {
            _connection: conn,
            channel,
            queue: cfg.queue.clone(),
        })
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, payload: &[u8]) -> BrokerResult<()> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;

        match confirm {
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => {
                Err(BrokerError::Rejected("negative publisher confirm".into()))
            }
        }
    }
}

/// AMQP subscription. Prefetch bounds in-flight deliveries, so a slow
/// handler backpressures the broker instead of buffering in memory.
pub struct AmqpSource {
    cfg: AmqpConfig,
    prefetch: u16,
    _connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl AmqpSource {
    pub async fn connect(cfg: AmqpConfig, prefetch: u16) -> BrokerResult<Self> {
        let (conn, channel, consumer) = Self::open(&cfg, prefetch).await?;
        Ok(Self {
            cfg,
            prefetch,
            _connection: conn,
            channel,
            consumer,
        })
    }

    async fn open(
        cfg: &AmqpConfig,
        prefetch: u16,
    ) -> BrokerResult<(Connection, Channel, Consumer)> {
        let (conn, channel) = open_channel(cfg).await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &cfg.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %cfg.queue, prefetch, "amqp subscription established");
        Ok((conn, channel, consumer))
    }
}

#[async_trait]
impl MessageSource for AmqpSource {
    async fn next(&mut self) -> BrokerResult<Option<InboundMessage>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => {
                debug!(tag = delivery.delivery_tag, len = delivery.data.len(), "delivery");
                Ok(Some(InboundMessage {
                    delivery_tag: delivery.delivery_tag,
                    payload: delivery.data,
                }))
            }
            Some(Err(e)) => Err(e.into()),
            // Stream exhausted: the connection or channel is gone.
            None => Ok(None),
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack_requeue(&mut self, delivery_tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn publish_dead_letter(&mut self, payload: &[u8]) -> BrokerResult<()> {
        warn!(len = payload.len(), queue = %self.cfg.dead_letter_queue(), "dead-lettering message");
        self.channel
            .basic_publish(
                "",
                &self.cfg.dead_letter_queue(),
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn reconnect(&mut self) -> BrokerResult<()> {
        info!(queue = %self.cfg.queue, "reconnecting amqp subscription");
        let (conn, channel, consumer) = Self::open(&self.cfg, self.prefetch).await?;
        self._connection = conn;
        self.channel = channel;
        self.consumer = consumer;
        Ok(())
    }
}
