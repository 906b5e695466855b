//! Message handler trait and small handlers for tests.

use crate::error::HandlerError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Reacts to one delivered message body.
///
/// Handlers run concurrently for deliveries on the same subscription, so any
/// shared state needs its own synchronization.
///
/// Return [`HandlerError::Transient`] when a retry could succeed and
/// [`HandlerError::Permanent`] when it cannot. The category only changes the
/// message's fate under ack-on-completion; under ack-on-receipt the message is
/// already gone and the error is logged.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// Records every body it receives.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    notify: Arc<Notify>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().await.clone()
    }

    /// Wait until at least `count` messages were handled.
    pub async fn wait_for(&self, count: usize) -> Vec<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            {
                let received = self.received.lock().await;
                if received.len() >= count {
                    return received.clone();
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        self.received.lock().await.push(body.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording_handler"
    }
}

/// Fails the first `failures` calls, then succeeds.
#[derive(Clone)]
pub struct FailingHandler {
    failures: usize,
    transient: bool,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn transient(failures: usize) -> Self {
        Self {
            failures,
            transient: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn permanent(failures: usize) -> Self {
        Self {
            failures,
            transient: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _body: &[u8]) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.failures {
            return Ok(());
        }
        if self.transient {
            Err(HandlerError::transient("simulated outage"))
        } else {
            Err(HandlerError::permanent("simulated bad payload"))
        }
    }

    fn name(&self) -> &'static str {
        "failing_handler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[tokio::test]
    async fn test_recording_handler() {
        let handler = RecordingHandler::new();
        handler.handle(b"one").await.unwrap();
        handler.handle(b"two").await.unwrap();

        let received = handler.wait_for(2).await;
        assert_eq!(received, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(handler.name(), "recording_handler");
    }

    #[tokio::test]
    async fn test_failing_handler_recovers() {
        let handler = FailingHandler::transient(1);
        let err = handler.handle(b"x").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(handler.handle(b"x").await.is_ok());
        assert_eq!(handler.calls(), 2);

        let handler = FailingHandler::permanent(1);
        assert_eq!(
            handler.handle(b"x").await.unwrap_err().category(),
            ErrorCategory::Permanent
        );
    }
}
