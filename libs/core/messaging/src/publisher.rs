//! Fire-and-forget publishing to a single exchange.

use crate::broker::Broker;
use crate::error::MessagingResult;
use crate::metrics::PublisherMetrics;
use crate::topology::ExchangeDef;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Publishes to one exchange, deriving each routing key from the message body.
///
/// Built once per exchange and reused. A publish returns once the broker
/// client accepted the message; delivery is not confirmed, but failing to
/// hand the message over is an error.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    exchange: ExchangeDef,
    metrics: PublisherMetrics,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: ExchangeDef) -> Self {
        let metrics = PublisherMetrics::new(&exchange.name);
        Self {
            broker,
            exchange,
            metrics,
        }
    }

    pub fn exchange(&self) -> &ExchangeDef {
        &self.exchange
    }

    #[instrument(skip_all, fields(exchange = %self.exchange.name, size = body.len()))]
    pub async fn publish(&self, body: &[u8]) -> MessagingResult<()> {
        let routing_key = self.exchange.routing_key.key_for(body);

        if let Err(e) = self
            .broker
            .publish(&self.exchange.name, &routing_key, body)
            .await
        {
            self.metrics.publish_failed();
            error!(error = %e, routing_key = %routing_key, "Failed to publish message");
            return Err(e);
        }

        self.metrics.published();
        debug!(routing_key = %routing_key, "Message published");
        Ok(())
    }

    /// Serialize `value` as JSON and publish it.
    pub async fn publish_json<T>(&self, value: &T) -> MessagingResult<()>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        self.publish(&body).await
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("broker", &self.broker.name())
            .field("exchange", &self.exchange.name)
            .finish()
    }
}
