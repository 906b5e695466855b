//! Prometheus metrics for publishers and consumers.

use crate::error::ErrorCategory;
use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics recorded by a [`Publisher`](crate::Publisher).
#[derive(Clone, Debug)]
pub struct PublisherMetrics {
    exchange: String,
}

impl PublisherMetrics {
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
        }
    }

    pub fn published(&self) {
        counter!(
            "messaging_messages_published_total",
            "exchange" => self.exchange.clone()
        )
        .increment(1);
    }

    pub fn publish_failed(&self) {
        counter!(
            "messaging_publish_failures_total",
            "exchange" => self.exchange.clone()
        )
        .increment(1);
    }
}

/// Metrics recorded by a [`Consumer`](crate::Consumer) subscription.
#[derive(Clone, Debug)]
pub struct ConsumerMetrics {
    queue: String,
    handler: String,
}

impl ConsumerMetrics {
    pub fn new(queue: &str, handler: &str) -> Self {
        Self {
            queue: queue.to_string(),
            handler: handler.to_string(),
        }
    }

    pub fn delivery_received(&self) {
        counter!(
            "messaging_deliveries_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn handler_succeeded(&self, duration: Duration) {
        counter!(
            "messaging_handler_success_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);

        histogram!(
            "messaging_handler_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn handler_failed(&self, category: ErrorCategory) {
        counter!(
            "messaging_handler_failures_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "category" => category.as_str()
        )
        .increment(1);
    }

    pub fn requeued(&self) {
        counter!(
            "messaging_deliveries_requeued_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder. Call once per process.
#[cfg(feature = "health")]
pub fn init_metrics() -> Result<
    metrics_exporter_prometheus::PrometheusHandle,
    metrics_exporter_prometheus::BuildError,
> {
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
