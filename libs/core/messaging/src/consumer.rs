//! Queue subscriptions that dispatch deliveries to a [`MessageHandler`].
//!
//! A subscription runs two tasks: a receive loop that pulls deliveries off the
//! broker stream and forwards them over a bounded channel, and a dispatcher
//! that runs the handler for each delivery with bounded concurrency and then
//! settles it according to the [`AckPolicy`].
//!
//! If the delivery stream fails or ends before [`Subscription::cancel`] is
//! called (a dropped connection, a consumer cancelled by the broker), the
//! subscription stops: [`Subscription::closed`] resolves and `cancel` returns
//! the failure.

use crate::broker::{Broker, Delivery};
use crate::error::{MessagingError, MessagingResult};
use crate::handler::MessageHandler;
use crate::metrics::ConsumerMetrics;
use futures::StreamExt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 16;

/// When a delivery is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledged as soon as it is delivered, before the handler runs. A
    /// failing handler or a crash mid-handler loses the message.
    #[default]
    OnReceipt,
    /// Acknowledged after the handler succeeds. Transient failures are
    /// requeued, permanent ones rejected.
    OnCompletion,
}

impl FromStr for AckPolicy {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "receipt" | "on_receipt" | "on-receipt" => Ok(AckPolicy::OnReceipt),
            "completion" | "on_completion" | "on-completion" => Ok(AckPolicy::OnCompletion),
            other => Err(MessagingError::InvalidAckPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub consumer_tag: String,
    pub ack_policy: AckPolicy,
    pub max_concurrent_handlers: usize,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        let consumer_tag = format!("{}-{}", queue, uuid::Uuid::new_v4().simple());
        Self {
            queue,
            consumer_tag,
            ack_policy: AckPolicy::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max.max(1);
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }
}

pub struct Consumer {
    broker: Arc<dyn Broker>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(broker: Arc<dyn Broker>, config: ConsumerConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Subscribe `handler` to the queue.
    ///
    /// Returns once the broker accepted the consumer; messages are handled in
    /// background tasks until [`Subscription::cancel`] is called. Dropping the
    /// handle detaches the subscription.
    pub async fn listen(&self, handler: Arc<dyn MessageHandler>) -> MessagingResult<Subscription> {
        let ConsumerConfig {
            queue,
            consumer_tag,
            ack_policy,
            max_concurrent_handlers,
        } = self.config.clone();
        let max_concurrent_handlers = max_concurrent_handlers.max(1);

        let no_ack = ack_policy == AckPolicy::OnReceipt;
        let deliveries = self.broker.consume(&queue, &consumer_tag, no_ack).await?;

        info!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            handler = handler.name(),
            ack_policy = ?ack_policy,
            max_concurrent_handlers,
            broker = self.broker.name(),
            "Listening on queue"
        );

        let metrics = ConsumerMetrics::new(&queue, handler.name());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (alive_tx, alive_rx) = watch::channel(());
        let (delivery_tx, delivery_rx) = mpsc::channel(max_concurrent_handlers);

        let receiver = tokio::spawn(receive_loop(
            deliveries,
            delivery_tx,
            shutdown_rx,
            alive_tx,
            metrics.clone(),
            queue.clone(),
        ));
        let dispatcher = tokio::spawn(dispatch_loop(
            delivery_rx,
            handler,
            ack_policy,
            max_concurrent_handlers,
            metrics,
        ));

        Ok(Subscription {
            broker: self.broker.clone(),
            queue,
            consumer_tag,
            shutdown: shutdown_tx,
            alive: alive_rx,
            receiver,
            dispatcher,
        })
    }
}

/// Forward deliveries to the dispatcher until shutdown is requested.
///
/// `_alive` is dropped on return, which is what [`Subscription::closed`]
/// waits for.
async fn receive_loop(
    mut deliveries: crate::broker::DeliveryStream,
    delivery_tx: mpsc::Sender<Delivery>,
    mut shutdown_rx: watch::Receiver<bool>,
    _alive: watch::Sender<()>,
    metrics: ConsumerMetrics,
    queue: String,
) -> MessagingResult<()> {
    loop {
        tokio::select! {
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!(queue = %queue, "Receive loop stopping");
                    return Ok(());
                }
            }
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    metrics.delivery_received();
                    if delivery_tx.send(delivery).await.is_err() {
                        error!(queue = %queue, "Dispatcher stopped, no longer receiving");
                        return Err(MessagingError::Consumer(format!(
                            "dispatcher for queue '{queue}' stopped"
                        )));
                    }
                }
                Some(Err(e)) => {
                    error!(queue = %queue, error = %e, "Delivery stream failed");
                    return Err(e);
                }
                None if *shutdown_rx.borrow() => {
                    debug!(queue = %queue, "Delivery stream ended on cancel");
                    return Ok(());
                }
                None => {
                    error!(queue = %queue, "Delivery stream ended without a cancel");
                    return Err(MessagingError::Consumer(format!(
                        "delivery stream for queue '{queue}' ended unexpectedly"
                    )));
                }
            }
        }
    }
}

async fn dispatch_loop(
    mut delivery_rx: mpsc::Receiver<Delivery>,
    handler: Arc<dyn MessageHandler>,
    ack_policy: AckPolicy,
    max_concurrent_handlers: usize,
    metrics: ConsumerMetrics,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent_handlers));
    let mut in_flight = JoinSet::new();

    while let Some(delivery) = delivery_rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let handler = handler.clone();
        let metrics = metrics.clone();

        in_flight.spawn(async move {
            handle_delivery(handler.as_ref(), delivery, ack_policy, &metrics).await;
            drop(permit);
        });

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Handler task panicked");
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "Handler task panicked");
        }
    }
}

async fn handle_delivery(
    handler: &dyn MessageHandler,
    mut delivery: Delivery,
    ack_policy: AckPolicy,
    metrics: &ConsumerMetrics,
) {
    if delivery.redelivered {
        debug!(handler = handler.name(), "Handling redelivered message");
    }

    let start = Instant::now();
    let result = handler.handle(&delivery.body).await;
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            metrics.handler_succeeded(duration);
            if let Err(e) = delivery.ack().await {
                warn!(handler = handler.name(), error = %e, "Failed to ack delivery");
            }
            debug!(
                handler = handler.name(),
                duration_ms = duration.as_millis() as u64,
                "Message handled"
            );
        }
        Err(err) => {
            let category = err.category();
            metrics.handler_failed(category);

            match ack_policy {
                AckPolicy::OnReceipt => {
                    error!(
                        handler = handler.name(),
                        category = %category,
                        error = %err,
                        "Handler failed; message was acknowledged on receipt and will not be redelivered"
                    );
                }
                AckPolicy::OnCompletion => {
                    let requeue = category.should_requeue();
                    warn!(
                        handler = handler.name(),
                        category = %category,
                        requeue,
                        error = %err,
                        "Handler failed, rejecting message"
                    );
                    if requeue {
                        metrics.requeued();
                    }
                    if let Err(e) = delivery.nack(requeue).await {
                        warn!(handler = handler.name(), error = %e, "Failed to nack delivery");
                    }
                }
            }
        }
    }
}

/// Handle to a running subscription.
pub struct Subscription {
    broker: Arc<dyn Broker>,
    queue: String,
    consumer_tag: String,
    shutdown: watch::Sender<bool>,
    alive: watch::Receiver<()>,
    receiver: JoinHandle<MessagingResult<()>>,
    dispatcher: JoinHandle<()>,
}

impl Subscription {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Resolves once the subscription has stopped receiving on its own.
    ///
    /// Stays pending while deliveries flow. The returned future does not
    /// borrow the subscription, so it can be raced against a shutdown signal
    /// and followed by [`cancel`](Self::cancel) to learn the cause.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut alive = self.alive.clone();
        async move {
            // Never sent on; resolves when the receive loop drops its sender.
            let _ = alive.changed().await;
        }
    }

    /// Stop receiving new deliveries and wait for in-flight handlers to finish.
    ///
    /// Handlers are never interrupted. Deliveries already received but not yet
    /// dispatched are still handled. Returns the stream failure if the
    /// subscription had already stopped on its own.
    pub async fn cancel(self) -> MessagingResult<()> {
        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Cancelling subscription");

        let _ = self.shutdown.send(true);
        let cancelled = self.broker.cancel(&self.consumer_tag).await;

        let received = match self.receiver.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Receive loop panicked");
                Err(MessagingError::Consumer(format!("receive loop panicked: {e}")))
            }
        };
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Dispatcher panicked");
        }

        info!(queue = %self.queue, "Subscription drained");
        received.and(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{FailingHandler, RecordingHandler};
    use crate::memory::InMemoryBroker;
    use crate::topology::{declare_and_bind, ExchangeDef, QueueDef};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn setup() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        declare_and_bind(&broker, &ExchangeDef::direct("ex", "42"), &QueueDef::quorum("q"))
            .await
            .unwrap();
        broker
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_ack_policy_from_str() {
        assert_eq!("receipt".parse::<AckPolicy>().unwrap(), AckPolicy::OnReceipt);
        assert_eq!(
            "Completion".parse::<AckPolicy>().unwrap(),
            AckPolicy::OnCompletion
        );
        assert!(matches!(
            "never".parse::<AckPolicy>(),
            Err(MessagingError::InvalidAckPolicy(_))
        ));
        assert_eq!(AckPolicy::default(), AckPolicy::OnReceipt);
    }

    #[tokio::test]
    async fn test_listen_delivers_every_message() {
        let broker = setup().await;
        let handler = RecordingHandler::new();
        let consumer = Consumer::new(Arc::new(broker.clone()), ConsumerConfig::new("q"));
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        for i in 0..5 {
            broker.publish("ex", "42", format!("m{i}").as_bytes()).await.unwrap();
        }

        let received = tokio::time::timeout(Duration::from_secs(2), handler.wait_for(5))
            .await
            .unwrap();
        assert_eq!(received.len(), 5);

        subscription.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_on_receipt_loses_message_when_handler_fails() {
        let broker = setup().await;
        let handler = FailingHandler::transient(1);
        let consumer = Consumer::new(Arc::new(broker.clone()), ConsumerConfig::new("q"));
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        broker.publish("ex", "42", b"doomed").await.unwrap();
        eventually(|| handler.calls() == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.message_count("q").await.unwrap(), 0);

        subscription.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_on_completion_requeues_transient_failure() {
        let broker = setup().await;
        let handler = FailingHandler::transient(1);
        let config = ConsumerConfig::new("q").with_ack_policy(AckPolicy::OnCompletion);
        let consumer = Consumer::new(Arc::new(broker.clone()), config);
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        broker.publish("ex", "42", b"retry").await.unwrap();
        eventually(|| handler.calls() == 2).await;

        subscription.cancel().await.unwrap();
        assert_eq!(broker.message_count("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_on_completion_rejects_permanent_failure() {
        let broker = setup().await;
        let handler = FailingHandler::permanent(1);
        let config = ConsumerConfig::new("q").with_ack_policy(AckPolicy::OnCompletion);
        let consumer = Consumer::new(Arc::new(broker.clone()), config);
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        broker.publish("ex", "42", b"poison").await.unwrap();
        eventually(|| handler.calls() == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.calls(), 1);
        subscription.cancel().await.unwrap();
        assert_eq!(broker.message_count("q").await.unwrap(), 0);
    }

    struct SlowHandler {
        active: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn handle(&self, _body: &[u8]) -> Result<(), HandlerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow_handler"
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_cancel_drains() {
        let broker = setup().await;
        let handler = Arc::new(SlowHandler {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let config = ConsumerConfig::new("q").with_max_concurrent_handlers(2);
        let consumer = Consumer::new(Arc::new(broker.clone()), config);
        let subscription = consumer.listen(handler.clone()).await.unwrap();

        for _ in 0..6 {
            broker.publish("ex", "42", b"work").await.unwrap();
        }
        eventually(|| handler.done.load(Ordering::SeqCst) >= 1).await;

        subscription.cancel().await.unwrap();

        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert!(handler.peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(handler.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_deliveries() {
        let broker = setup().await;
        let handler = RecordingHandler::new();
        let consumer = Consumer::new(Arc::new(broker.clone()), ConsumerConfig::new("q"));
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        subscription.cancel().await.unwrap();
        broker.publish("ex", "42", b"after cancel").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handler.received().await.is_empty());
        assert_eq!(broker.message_count("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_reported() {
        let broker = setup().await;
        let handler = RecordingHandler::new();
        let consumer = Consumer::new(Arc::new(broker.clone()), ConsumerConfig::new("q"));
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        broker.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), subscription.closed())
            .await
            .expect("subscription should stop when the connection closes");
        let err = subscription.cancel().await.unwrap_err();
        assert!(matches!(err, MessagingError::Connection(_)));
        assert_eq!(err.category(), crate::error::ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_closed_stays_pending_while_healthy() {
        let broker = setup().await;
        let handler = RecordingHandler::new();
        let consumer = Consumer::new(Arc::new(broker.clone()), ConsumerConfig::new("q"));
        let subscription = consumer.listen(Arc::new(handler.clone())).await.unwrap();

        let closed = subscription.closed();
        broker.publish("ex", "42", b"still flowing").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handler.wait_for(1))
            .await
            .unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(50), closed)
            .await
            .is_err());
        subscription.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_on_missing_queue() {
        let broker = InMemoryBroker::new();
        let consumer = Consumer::new(Arc::new(broker), ConsumerConfig::new("missing"));
        let err = consumer
            .listen(Arc::new(RecordingHandler::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MessagingError::QueueNotFound(_)));
    }
}
