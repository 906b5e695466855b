//! In-process broker with direct, fanout and consistent-hash routing.
//!
//! Mirrors the declare/publish/consume behaviour of a RabbitMQ node closely
//! enough for tests and local runs: redeclaration conflicts are reported,
//! unroutable messages are dropped, and nacked messages can be requeued.

use crate::broker::{Acknowledger, Broker, Delivery, DeliveryStream};
use crate::error::{MessagingError, MessagingResult};
use crate::topology::{ExchangeDef, ExchangeKind, QueueDef};
use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tracing::{debug, trace};

struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

struct QueueState {
    arguments: BTreeMap<String, String>,
    messages: Mutex<VecDeque<Message>>,
    available: Notify,
}

impl QueueState {
    async fn push(&self, message: Message, front: bool) {
        let mut messages = self.messages.lock().await;
        if front {
            messages.push_front(message);
        } else {
            messages.push_back(message);
        }
        drop(messages);
        self.available.notify_one();
    }
}

/// What a consumer stream is told to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConsumerControl {
    Running,
    Cancelled,
    ConnectionClosed,
}

struct ExchangeState {
    kind: ExchangeKind,
    /// (queue, binding key)
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, Arc<QueueState>>,
    consumers: HashMap<String, watch::Sender<ConsumerControl>>,
    closed: bool,
}

impl State {
    fn ensure_open(&self) -> MessagingResult<()> {
        if self.closed {
            Err(MessagingError::Connection("broker connection closed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Broker that lives entirely in memory. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ready messages waiting in `queue`.
    pub async fn message_count(&self, queue: &str) -> MessagingResult<usize> {
        let state = self.state.read().await;
        let queue_state = state
            .queues
            .get(queue)
            .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
        let count = queue_state.messages.lock().await.len();
        Ok(count)
    }
}

/// 64-bit point on the hash ring.
fn ring_point(input: &[u8]) -> u64 {
    let digest = Sha256::digest(input);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn parse_weight(exchange: &str, binding_key: &str) -> MessagingResult<u32> {
    match binding_key.parse::<u32>() {
        Ok(weight) if weight > 0 => Ok(weight),
        _ => Err(MessagingError::InvalidBinding {
            exchange: exchange.to_string(),
            details: format!(
                "consistent-hash binding key must be a positive integer weight, got '{binding_key}'"
            ),
        }),
    }
}

/// Pick the queue owning `routing_key` on a ring where each binding contributes
/// `weight` points.
fn consistent_hash_target<'a>(bindings: &'a [(String, String)], routing_key: &str) -> Option<&'a str> {
    let mut ring: Vec<(u64, &str)> = Vec::new();
    for (queue, key) in bindings {
        let weight = key.parse::<u32>().unwrap_or(0);
        for point in 0..weight {
            ring.push((ring_point(format!("{queue}:{point}").as_bytes()), queue.as_str()));
        }
    }
    if ring.is_empty() {
        return None;
    }
    ring.sort_unstable();

    let target = ring_point(routing_key.as_bytes());
    let index = ring.partition_point(|(point, _)| *point < target);
    Some(ring[index % ring.len()].1)
}

fn route<'a>(exchange: &'a ExchangeState, routing_key: &str) -> Vec<&'a str> {
    let mut targets: Vec<&str> = match &exchange.kind {
        ExchangeKind::Direct => exchange
            .bindings
            .iter()
            .filter(|(_, key)| key == routing_key)
            .map(|(queue, _)| queue.as_str())
            .collect(),
        ExchangeKind::Fanout => exchange
            .bindings
            .iter()
            .map(|(queue, _)| queue.as_str())
            .collect(),
        ExchangeKind::ConsistentHash => consistent_hash_target(&exchange.bindings, routing_key)
            .into_iter()
            .collect(),
        ExchangeKind::Custom(_) => Vec::new(),
    };
    targets.sort_unstable();
    targets.dedup();
    targets
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    body: Vec<u8>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> MessagingResult<()> {
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> MessagingResult<()> {
        if requeue {
            self.queue
                .push(
                    Message {
                        body: self.body.clone(),
                        redelivered: true,
                    },
                    true,
                )
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &ExchangeDef) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if let ExchangeKind::Custom(kind) = &exchange.kind {
            return Err(MessagingError::UnsupportedExchangeKind(kind.clone()));
        }

        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing.kind != exchange.kind => {
                Err(MessagingError::TopologyConflict {
                    entity: "exchange",
                    name: exchange.name.clone(),
                    details: format!(
                        "declared as '{}', requested '{}'",
                        existing.kind, exchange.kind
                    ),
                })
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    exchange.name.clone(),
                    ExchangeState {
                        kind: exchange.kind.clone(),
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueDef) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        match state.queues.get(&queue.name) {
            Some(existing) if existing.arguments != queue.arguments => {
                Err(MessagingError::TopologyConflict {
                    entity: "queue",
                    name: queue.name.clone(),
                    details: format!(
                        "declared with {:?}, requested {:?}",
                        existing.arguments, queue.arguments
                    ),
                })
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    queue.name.clone(),
                    Arc::new(QueueState {
                        arguments: queue.arguments.clone(),
                        messages: Mutex::new(VecDeque::new()),
                        available: Notify::new(),
                    }),
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if !state.queues.contains_key(queue) {
            return Err(MessagingError::QueueNotFound(queue.to_string()));
        }
        let exchange_state = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| MessagingError::ExchangeNotFound(exchange.to_string()))?;

        if exchange_state.kind == ExchangeKind::ConsistentHash {
            parse_weight(exchange, binding_key)?;
        }

        let binding = (queue.to_string(), binding_key.to_string());
        if !exchange_state.bindings.contains(&binding) {
            exchange_state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> MessagingResult<()> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let exchange_state = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| MessagingError::ExchangeNotFound(exchange.to_string()))?;

        let targets = route(exchange_state, routing_key);
        if targets.is_empty() {
            debug!(exchange, routing_key, "Message unroutable, dropped");
            return Ok(());
        }

        for name in targets {
            if let Some(queue) = state.queues.get(name) {
                trace!(exchange, routing_key, queue = name, "Routing message");
                queue
                    .push(
                        Message {
                            body: body.to_vec(),
                            redelivered: false,
                        },
                        false,
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> MessagingResult<DeliveryStream> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        let queue_state = state
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;

        if state.consumers.contains_key(consumer_tag) {
            return Err(MessagingError::Consumer(format!(
                "consumer tag '{consumer_tag}' already in use"
            )));
        }
        let (control_tx, mut control_rx) = watch::channel(ConsumerControl::Running);
        state.consumers.insert(consumer_tag.to_string(), control_tx);

        let stream = async_stream::stream! {
            loop {
                let control = *control_rx.borrow();
                match control {
                    ConsumerControl::Running => {}
                    ConsumerControl::Cancelled => break,
                    ConsumerControl::ConnectionClosed => {
                        yield Err(MessagingError::Connection(
                            "broker connection closed".to_string(),
                        ));
                        break;
                    }
                }

                let next = queue_state.messages.lock().await.pop_front();
                match next {
                    Some(message) => {
                        let delivery = if no_ack {
                            Delivery::pre_acknowledged(message.body, message.redelivered)
                        } else {
                            let acker = MemoryAcker {
                                queue: queue_state.clone(),
                                body: message.body.clone(),
                            };
                            Delivery::new(message.body, message.redelivered, Box::new(acker))
                        };
                        yield Ok(delivery);
                    }
                    None => {
                        tokio::select! {
                            _ = queue_state.available.notified() => {}
                            changed = control_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        if let Some(control) = state.consumers.remove(consumer_tag) {
            let _ = control.send(ConsumerControl::Cancelled);
        }
        Ok(())
    }

    async fn get(&self, queue: &str) -> MessagingResult<Option<Vec<u8>>> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let queue_state = state
            .queues
            .get(queue)
            .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
        let message = queue_state.messages.lock().await.pop_front();
        Ok(message.map(|m| m.body))
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        state.closed = true;
        for (_, control) in state.consumers.drain() {
            let _ = control.send(ConsumerControl::ConnectionClosed);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{declare_and_bind, RoutingKey};
    use std::time::Duration;

    async fn broker_with(exchange: &ExchangeDef, queues: &[QueueDef]) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        for queue in queues {
            declare_and_bind(&broker, exchange, queue).await.unwrap();
        }
        broker
    }

    #[tokio::test]
    async fn test_direct_routing_matches_key_only() {
        let exchange = ExchangeDef::direct("ex", "42");
        let broker = broker_with(&exchange, &[QueueDef::quorum("q")]).await;

        broker.publish("ex", "42", b"routed").await.unwrap();
        broker.publish("ex", "7", b"dropped").await.unwrap();

        assert_eq!(broker.get("q").await.unwrap(), Some(b"routed".to_vec()));
        assert_eq!(broker.get("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_queue() {
        let exchange = ExchangeDef::new("ex", ExchangeKind::Fanout, RoutingKey::fixed(""), "");
        let broker =
            broker_with(&exchange, &[QueueDef::classic("a"), QueueDef::classic("b")]).await;

        broker.publish("ex", "", b"all").await.unwrap();

        assert_eq!(broker.message_count("a").await.unwrap(), 1);
        assert_eq!(broker.message_count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consistent_hash_is_stable_and_spreads() {
        let exchange = ExchangeDef::consistent_hash("ex", "10");
        let broker = InMemoryBroker::new();
        declare_and_bind(&broker, &exchange, &QueueDef::classic("a"))
            .await
            .unwrap();
        declare_and_bind(&broker, &exchange, &QueueDef::classic("b"))
            .await
            .unwrap();

        for _ in 0..5 {
            broker.publish("ex", "same-key", b"m").await.unwrap();
        }
        let a = broker.message_count("a").await.unwrap();
        let b = broker.message_count("b").await.unwrap();
        assert!(a == 5 || b == 5, "one key must always map to one queue");

        for i in 0..200 {
            broker.publish("ex", &format!("key-{i}"), b"m").await.unwrap();
        }
        assert!(broker.message_count("a").await.unwrap() > a);
        assert!(broker.message_count("b").await.unwrap() > b);
    }

    #[tokio::test]
    async fn test_consistent_hash_rejects_non_numeric_binding() {
        let broker = InMemoryBroker::new();
        let exchange = ExchangeDef::consistent_hash("ex", "heavy");
        let err = declare_and_bind(&broker, &exchange, &QueueDef::classic("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidBinding { .. }));
    }

    #[tokio::test]
    async fn test_publish_to_missing_exchange() {
        let broker = InMemoryBroker::new();
        let err = broker.publish("nowhere", "k", b"m").await.unwrap_err();
        assert!(matches!(err, MessagingError::ExchangeNotFound(_)));
    }

    #[tokio::test]
    async fn test_custom_exchange_kind_unsupported() {
        let broker = InMemoryBroker::new();
        let exchange = ExchangeDef::new(
            "ex",
            ExchangeKind::Custom("x-delayed-message".to_string()),
            RoutingKey::fixed("k"),
            "k",
        );
        let err = broker.declare_exchange(&exchange).await.unwrap_err();
        assert!(matches!(err, MessagingError::UnsupportedExchangeKind(_)));
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let exchange = ExchangeDef::direct("ex", "42");
        let broker = broker_with(&exchange, &[QueueDef::quorum("q")]).await;
        broker.publish("ex", "42", b"retry me").await.unwrap();

        let mut stream = broker.consume("q", "tag", false).await.unwrap();
        let mut first = stream.next().await.unwrap().unwrap();
        assert!(!first.redelivered);
        first.nack(true).await.unwrap();

        let mut second = stream.next().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(second.body, b"retry me");
        second.ack().await.unwrap();
        assert_eq!(broker.message_count("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish_and_stops_on_cancel() {
        let exchange = ExchangeDef::direct("ex", "42");
        let broker = broker_with(&exchange, &[QueueDef::quorum("q")]).await;
        let mut stream = broker.consume("q", "tag", true).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("ex", "42", b"late").await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"late");
        assert!(delivery.is_settled());

        broker.cancel("tag").await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_consumer_tag() {
        let broker = broker_with(&ExchangeDef::direct("ex", "42"), &[QueueDef::quorum("q")]).await;
        let _stream = broker.consume("q", "tag", true).await.unwrap();
        assert!(broker.consume("q", "tag", true).await.is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_further_operations() {
        let broker = broker_with(&ExchangeDef::direct("ex", "42"), &[QueueDef::quorum("q")]).await;
        broker.close().await.unwrap();

        assert!(matches!(
            broker.publish("ex", "42", b"m").await,
            Err(MessagingError::Connection(_))
        ));
        assert!(matches!(
            broker.consume("q", "late", true).await,
            Err(MessagingError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_close_fails_open_consumer_streams() {
        let broker = broker_with(&ExchangeDef::direct("ex", "42"), &[QueueDef::quorum("q")]).await;
        let mut stream = broker.consume("q", "tag", false).await.unwrap();

        broker.close().await.unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(matches!(failure, Some(Err(MessagingError::Connection(_)))));
        assert!(stream.next().await.is_none());
    }
}
