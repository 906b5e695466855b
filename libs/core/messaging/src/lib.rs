//! Broker messaging for the email-verification services.
//!
//! - [`BrokerConfig`]: connection URL, queue type and [`AckPolicy`] from the
//!   environment.
//! - [`topology`]: exchange/queue definitions, routing-key generators and
//!   [`declare_and_bind`].
//! - [`Broker`]: the backend seam. [`InMemoryBroker`] serves tests and local
//!   runs; `AmqpBroker` (feature `amqp`) talks to RabbitMQ through `lapin`.
//! - [`Publisher`]: fire-and-forget publishing to one exchange.
//! - [`Consumer`]: subscriptions that run a [`MessageHandler`] per delivery
//!   under an [`AckPolicy`].
//!
//! ```text
//!  Publisher ──▶ exchange ──(binding key)──▶ queue ──▶ Consumer ──▶ MessageHandler
//!                   ▲                                      │
//!           routing key = f(body)                 ack on receipt | on completion
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(&url).await?);
//! let exchange = ExchangeDef::direct("registration-notification-exchange", "42");
//! declare_and_bind(broker.as_ref(), &exchange, &QueueDef::quorum("registration-notification")).await?;
//!
//! let subscription = Consumer::new(broker.clone(), ConsumerConfig::new("registration-notification"))
//!     .listen(handler)
//!     .await?;
//! Publisher::new(broker, exchange).publish_json(&message).await?;
//! ```

#[cfg(feature = "amqp")]
pub mod amqp;
mod broker;
mod config;
mod consumer;
mod error;
mod handler;
#[cfg(feature = "health")]
mod health;
mod memory;
pub mod metrics;
mod publisher;
pub mod topology;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use broker::{Acknowledger, Broker, Delivery, DeliveryStream};
pub use config::BrokerConfig;
pub use consumer::{
    AckPolicy, Consumer, ConsumerConfig, Subscription, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
pub use error::{ErrorCategory, HandlerError, MessagingError, MessagingResult};
pub use handler::{FailingHandler, MessageHandler, RecordingHandler};
#[cfg(feature = "health")]
pub use health::{HealthServer, HealthState, HealthStatus};
pub use memory::InMemoryBroker;
#[cfg(feature = "health")]
pub use metrics::init_metrics;
pub use publisher::Publisher;
pub use topology::{declare_and_bind, ExchangeDef, ExchangeKind, QueueDef, RoutingKey};
