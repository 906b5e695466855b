//! Exchange and queue definitions plus the declare-and-bind operation.

use crate::broker::Broker;
use crate::error::MessagingResult;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Queue argument selecting the queue implementation.
pub const QUEUE_TYPE_ARGUMENT: &str = "x-queue-type";

/// Routing algorithm of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Exact match between routing key and binding key.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
    /// `x-consistent-hash` plugin: the routing key is hashed onto a ring where
    /// each binding key is the queue's weight.
    ConsistentHash,
    /// Any other broker-specific type, passed through by name.
    Custom(String),
}

impl ExchangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::ConsistentHash => "x-consistent-hash",
            ExchangeKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes a routing key from a message body.
#[derive(Clone)]
pub struct RoutingKey(Arc<dyn Fn(&[u8]) -> String + Send + Sync>);

impl RoutingKey {
    /// The same key for every message.
    pub fn fixed(key: impl Into<String>) -> Self {
        let key = key.into();
        Self(Arc::new(move |_| key.clone()))
    }

    /// A fresh random key per message. Spreads load evenly over a
    /// consistent-hash exchange.
    pub fn random() -> Self {
        Self(Arc::new(|_| uuid::Uuid::new_v4().simple().to_string()))
    }

    /// Hex SHA-256 of the body, so identical payloads land on the same shard.
    pub fn content_hash() -> Self {
        Self(Arc::new(|body| format!("{:x}", Sha256::digest(body))))
    }

    pub fn custom<F>(generate: F) -> Self
    where
        F: Fn(&[u8]) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(generate))
    }

    pub fn key_for(&self, body: &[u8]) -> String {
        (self.0)(body)
    }
}

impl fmt::Debug for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoutingKey(..)")
    }
}

/// Static description of an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeDef {
    pub name: String,
    pub kind: ExchangeKind,
    pub routing_key: RoutingKey,
    pub binding_key: String,
}

impl ExchangeDef {
    pub fn new(
        name: impl Into<String>,
        kind: ExchangeKind,
        routing_key: RoutingKey,
        binding_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            routing_key,
            binding_key: binding_key.into(),
        }
    }

    /// Direct exchange where publishers and the binding share one fixed key.
    pub fn direct(name: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(name, ExchangeKind::Direct, RoutingKey::fixed(key.clone()), key)
    }

    /// Consistent-hash exchange with random routing keys. `weight` is the
    /// binding key, i.e. the bound queue's share of the hash ring.
    pub fn consistent_hash(name: impl Into<String>, weight: impl Into<String>) -> Self {
        Self::new(
            name,
            ExchangeKind::ConsistentHash,
            RoutingKey::random(),
            weight,
        )
    }

    pub fn with_routing_key(mut self, routing_key: RoutingKey) -> Self {
        self.routing_key = routing_key;
        self
    }
}

/// Static description of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDef {
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

impl QueueDef {
    /// Classic queue with no arguments (non-durable).
    pub fn classic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Quorum queue (durable).
    pub fn quorum(name: impl Into<String>) -> Self {
        Self::classic(name).with_argument(QUEUE_TYPE_ARGUMENT, "quorum")
    }

    /// Queue with the given `x-queue-type`; an empty type yields a classic queue.
    pub fn with_queue_type(name: impl Into<String>, queue_type: &str) -> Self {
        let queue = Self::classic(name);
        if queue_type.is_empty() {
            queue
        } else {
            queue.with_argument(QUEUE_TYPE_ARGUMENT, queue_type)
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Durable iff the arguments mark the queue as a quorum queue.
    pub fn durable(&self) -> bool {
        self.arguments
            .get(QUEUE_TYPE_ARGUMENT)
            .is_some_and(|t| t == "quorum")
    }
}

/// Declare `exchange`, declare `queue` and bind them with the exchange's binding key.
///
/// Identical redeclarations are no-ops. Conflicting parameters surface as
/// [`MessagingError::TopologyConflict`](crate::MessagingError::TopologyConflict)
/// and are not retried.
#[instrument(skip_all, fields(exchange = %exchange.name, queue = %queue.name))]
pub async fn declare_and_bind(
    broker: &dyn Broker,
    exchange: &ExchangeDef,
    queue: &QueueDef,
) -> MessagingResult<()> {
    debug!(kind = %exchange.kind, "Declaring exchange");
    broker.declare_exchange(exchange).await?;

    debug!(durable = queue.durable(), "Declaring queue");
    broker.declare_queue(queue).await?;

    broker
        .bind_queue(&queue.name, &exchange.name, &exchange.binding_key)
        .await?;

    info!(
        kind = %exchange.kind,
        binding_key = %exchange.binding_key,
        durable = queue.durable(),
        "Topology declared"
    );
    Ok(())
}
