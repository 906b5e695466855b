//! Broker-facing side of the notifier.

use async_trait::async_trait;
use messaging::{HandlerError, MessageHandler};
use tracing::debug;

use crate::models::NotificationMessage;
use crate::notifier::Notifier;
use crate::repository::NotificationRepository;

/// Decodes notification messages and hands them to a [`Notifier`].
pub struct NotificationHandler<R: NotificationRepository> {
    notifier: Notifier<R>,
}

impl<R: NotificationRepository> NotificationHandler<R> {
    pub fn new(notifier: Notifier<R>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<R: NotificationRepository + 'static> MessageHandler for NotificationHandler<R> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let message: NotificationMessage = serde_json::from_slice(body)
            .map_err(|e| HandlerError::permanent_with_source("malformed notification message", e))?;

        debug!(email = %message.email, "Received notification message");

        self.notifier
            .notify(&message.email, message.confirmation_code)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    HandlerError::transient_with_source("notification failed", e)
                } else {
                    HandlerError::permanent_with_source("notification failed", e)
                }
            })
    }

    fn name(&self) -> &'static str {
        "notification_handler"
    }
}
