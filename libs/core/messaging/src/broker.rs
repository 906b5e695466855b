//! Broker abstraction shared by the AMQP and in-memory backends.

use crate::error::MessagingResult;
use crate::topology::{ExchangeDef, QueueDef};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// Stream of deliveries returned by [`Broker::consume`].
pub type DeliveryStream = BoxStream<'static, MessagingResult<Delivery>>;

/// Connection to a message broker.
///
/// One instance is created at startup, shared as `Arc<dyn Broker>` by
/// publishers and consumers, and closed on shutdown.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare an exchange (non-durable, not auto-deleted).
    async fn declare_exchange(&self, exchange: &ExchangeDef) -> MessagingResult<()>;

    /// Declare a queue; durability follows [`QueueDef::durable`].
    async fn declare_queue(&self, queue: &QueueDef) -> MessagingResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str)
        -> MessagingResult<()>;

    /// Hand a message to the broker. Returns once the broker client accepted
    /// it; delivery is not confirmed.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8])
        -> MessagingResult<()>;

    /// Start consuming `queue`. With `no_ack` the broker considers messages
    /// consumed as soon as they are delivered.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> MessagingResult<DeliveryStream>;

    /// Stop the consumer registered under `consumer_tag`.
    async fn cancel(&self, consumer_tag: &str) -> MessagingResult<()>;

    /// Pull a single message, acknowledging it immediately.
    async fn get(&self, queue: &str) -> MessagingResult<Option<Vec<u8>>>;

    async fn close(&self) -> MessagingResult<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> MessagingResult<()>;
    async fn nack(&self, requeue: bool) -> MessagingResult<()>;
}

/// A message received from a queue.
///
/// Deliveries consumed with `no_ack` carry no acknowledger and treat
/// [`ack`](Self::ack)/[`nack`](Self::nack) as no-ops. A delivery is settled at
/// most once; later calls do nothing.
pub struct Delivery {
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            body,
            redelivered,
            acker: Some(acker),
        }
    }

    /// A delivery the broker already considers consumed.
    pub fn pre_acknowledged(body: Vec<u8>, redelivered: bool) -> Self {
        Self {
            body,
            redelivered,
            acker: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.acker.is_none()
    }

    pub async fn ack(&mut self) -> MessagingResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nack(&mut self, requeue: bool) -> MessagingResult<()> {
        match self.acker.take() {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .field("settled", &self.is_settled())
            .finish()
    }
}
