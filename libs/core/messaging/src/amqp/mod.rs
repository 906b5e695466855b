//! RabbitMQ backend built on `lapin`.
//!
//! One connection and one channel are opened at startup and shared by every
//! publisher and consumer through `Arc<dyn Broker>`. [`Broker::close`] closes
//! both.

use crate::broker::{Acknowledger, Broker, Delivery, DeliveryStream};
use crate::error::{MessagingError, MessagingResult};
use crate::topology::{ExchangeDef, ExchangeKind, QueueDef};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
    BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Broker connected to a RabbitMQ node.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Open a connection and a channel on `url` (e.g. `amqp://localhost:5672`).
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> MessagingResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        info!(channel_id = channel.id(), "Connected to AMQP broker");
        Ok(Self {
            connection,
            channel,
        })
    }
}

fn exchange_kind(kind: &ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::ConsistentHash => lapin::ExchangeKind::Custom(kind.as_str().to_string()),
        ExchangeKind::Custom(name) => lapin::ExchangeKind::Custom(name.clone()),
    }
}

fn field_table(arguments: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    table
}

/// Map a lapin error, turning the broker's soft channel errors into their
/// topology counterparts.
fn map_error(entity: &'static str, name: &str, error: lapin::Error) -> MessagingError {
    if let lapin::Error::ProtocolError(amqp) = &error {
        match amqp.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                return MessagingError::TopologyConflict {
                    entity,
                    name: name.to_string(),
                    details: amqp.get_message().as_str().to_string(),
                };
            }
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) if entity == "queue" => {
                return MessagingError::QueueNotFound(name.to_string());
            }
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => {
                return MessagingError::ExchangeNotFound(name.to_string());
            }
            _ => {}
        }
    }
    MessagingError::Connection(error.to_string())
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> MessagingResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::Consumer(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> MessagingResult<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| MessagingError::Consumer(e.to_string()))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, exchange: &ExchangeDef) -> MessagingResult<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(&exchange.kind),
                ExchangeDeclareOptions {
                    durable: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_error("exchange", &exchange.name, e))
    }

    async fn declare_queue(&self, queue: &QueueDef) -> MessagingResult<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable(),
                    ..Default::default()
                },
                field_table(&queue.arguments),
            )
            .await
            .map_err(|e| map_error("queue", &queue.name, e))?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> MessagingResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_error("exchange", exchange, e))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> MessagingResult<()> {
        // The returned confirmation is dropped: publishes are not confirmed.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| MessagingError::Publish {
                exchange: exchange.to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> MessagingResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_error("queue", queue, e))?;

        debug!(queue, consumer_tag, no_ack, "AMQP consumer started");

        let stream = consumer.map(move |delivery| -> MessagingResult<Delivery> {
            let delivery = delivery.map_err(|e| MessagingError::Consumer(e.to_string()))?;
            Ok(if no_ack {
                Delivery::pre_acknowledged(delivery.data, delivery.redelivered)
            } else {
                Delivery::new(
                    delivery.data,
                    delivery.redelivered,
                    Box::new(AmqpAcker(delivery.acker)),
                )
            })
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> MessagingResult<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| MessagingError::Consumer(e.to_string()))
    }

    async fn get(&self, queue: &str) -> MessagingResult<Option<Vec<u8>>> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .map_err(|e| map_error("queue", queue, e))?;
        Ok(message.map(|m| m.delivery.data))
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.channel.status().connected() {
            self.channel
                .close(200, "closing")
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(200, "closing")
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }
        info!("AMQP connection closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "amqp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Consumer, ConsumerConfig};
    use crate::handler::RecordingHandler;
    use crate::publisher::Publisher;
    use crate::topology::declare_and_bind;
    use std::sync::Arc;
    use std::time::Duration;
    use test_utils::TestRabbit;

    #[test]
    fn test_exchange_kind_mapping() {
        assert!(matches!(
            exchange_kind(&ExchangeKind::ConsistentHash),
            lapin::ExchangeKind::Custom(name) if name == "x-consistent-hash"
        ));
        assert!(matches!(
            exchange_kind(&ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        ));
    }

    #[test]
    fn test_field_table_from_arguments() {
        let queue = QueueDef::quorum("q");
        let table = field_table(&queue.arguments);
        assert_eq!(table.inner().len(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_amqp_round_trip_and_conflict() {
        let rabbit = TestRabbit::new().await;
        let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(rabbit.url()).await.unwrap());
        let exchange = ExchangeDef::direct("test-exchange", "42");
        let queue = QueueDef::quorum("test-queue");
        declare_and_bind(broker.as_ref(), &exchange, &queue)
            .await
            .unwrap();
        declare_and_bind(broker.as_ref(), &exchange, &queue)
            .await
            .unwrap();

        let handler = RecordingHandler::new();
        let subscription = Consumer::new(broker.clone(), ConsumerConfig::new("test-queue"))
            .listen(Arc::new(handler.clone()))
            .await
            .unwrap();

        Publisher::new(broker.clone(), exchange)
            .publish(b"hello")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(10), handler.wait_for(1))
            .await
            .unwrap();
        assert_eq!(received, vec![b"hello".to_vec()]);
        subscription.cancel().await.unwrap();

        let err = broker
            .declare_queue(&QueueDef::classic("test-queue"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::TopologyConflict { .. }));
    }
}
