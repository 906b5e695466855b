use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{CONFIRMATION_SUBJECT, confirmation_body};
use crate::providers::{EmailContent, EmailProvider};
use crate::repository::NotificationRepository;

/// Sends confirmation emails and records each accepted one.
pub struct Notifier<R: NotificationRepository> {
    repository: Arc<R>,
    provider: Arc<dyn EmailProvider>,
}

impl<R: NotificationRepository> Notifier<R> {
    pub fn new(repository: R, provider: Arc<dyn EmailProvider>) -> Self {
        Self {
            repository: Arc::new(repository),
            provider,
        }
    }

    /// Email `code` to `email`, then record the notification.
    ///
    /// Nothing is recorded unless the provider accepted the email.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn notify(&self, email: &str, code: Uuid) -> NotificationResult<()> {
        let content = EmailContent::new(email, CONFIRMATION_SUBJECT, confirmation_body(code));

        let sent = self.provider.send(&content).await?;
        if !sent.accepted {
            warn!(status = sent.status, "Confirmation email was not accepted");
            return Err(NotificationError::DeliveryRejected {
                provider: self.provider.name(),
                to: email.to_string(),
                status: sent.status,
            });
        }

        self.repository.save(email, code).await?;
        info!(message_id = ?sent.message_id, "Confirmation email sent");
        Ok(())
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}
