/// AMQP 0.9.1 consumer (RabbitMQ)
///
/// Topology declared on every connect:
/// - topic exchange, durable, not auto-deleted
/// - durable queue with `x-message-ttl` so undelivered notifications expire
/// - binding of the queue to the exchange with the configured pattern
/// - prefetch of one, matching the router's one-at-a-time processing
use super::{BrokerConnector, BrokerDelivery, BrokerError, DeliverySource};
use crate::config::BrokerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::info;

const PREFETCH: u16 = 1;

/// Connects to the broker and declares the notification topology
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    config: BrokerConfig,
}

impl AmqpConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    async fn declare(&self, channel: &Channel) -> Result<(), BrokerError> {
        let cfg = &self.config;

        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Declare(format!("qos: {}", e)))?;

        channel
            .exchange_declare(
                &cfg.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("exchange {}: {}", cfg.exchange, e)))?;

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(i64::try_from(cfg.message_ttl_ms).unwrap_or(i64::MAX)),
        );

        channel
            .queue_declare(
                &cfg.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("queue {}: {}", cfg.queue, e)))?;

        channel
            .queue_bind(
                &cfg.queue,
                &cfg.exchange,
                &cfg.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::Declare(format!(
                    "bind {} -> {} ({}): {}",
                    cfg.queue, cfg.exchange, cfg.routing_key, e
                ))
            })?;

        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    type Source = AmqpSource;

    async fn connect(&self) -> Result<AmqpSource, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(self.config.consumer_tag.as_str().into());

        let connection = Connection::connect(&self.config.uri, properties)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(format!("channel: {}", e)))?;

        self.declare(&channel).await?;

        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        info!(
            exchange = %self.config.exchange,
            queue = %self.config.queue,
            routing_key = %self.config.routing_key,
            "consuming from broker"
        );

        Ok(AmqpSource {
            _connection: connection,
            channel,
            consumer,
        })
    }
}

/// Live consumer on the notification queue
pub struct AmqpSource {
    // Owned so the connection lives as long as the consumer
    _connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl DeliverySource for AmqpSource {
    async fn next_delivery(&mut self) -> Option<Result<BrokerDelivery, BrokerError>> {
        let next = self.consumer.next().await?;

        Some(
            next.map(|delivery| BrokerDelivery {
                routing_key: delivery.routing_key.as_str().to_owned(),
                body: Bytes::from(delivery.data),
                delivery_tag: delivery.delivery_tag,
            })
            .map_err(|e| BrokerError::Consume(e.to_string())),
        )
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                tag: delivery_tag,
                reason: e.to_string(),
            })
    }
}
