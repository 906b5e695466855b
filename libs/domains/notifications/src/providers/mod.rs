//! Email transport.
//!
//! The `EmailProvider` trait and its SendGrid and recording implementations.

mod recording;
mod sendgrid;

pub use recording::RecordingEmailProvider;
pub use sendgrid::{DEFAULT_SENDGRID_URL, SendGridConfig, SendGridProvider};

use crate::error::NotificationResult;
use async_trait::async_trait;

/// Outcome of a send request the provider answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Provider-specific message ID for tracking.
    pub message_id: Option<String>,
    /// Whether the email was accepted for delivery (2xx).
    pub accepted: bool,
    /// HTTP status returned by the provider.
    pub status: u16,
}

/// Plain-text email ready for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailContent {
    pub to_email: String,
    pub subject: String,
    pub text_body: String,
}

impl EmailContent {
    pub fn new(
        to_email: impl Into<String>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            to_email: to_email.into(),
            subject: subject.into(),
            text_body: text_body.into(),
        }
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email.
    ///
    /// Transport failures are errors. A response with a non-success status is
    /// returned as `accepted: false` so the caller decides how to surface it.
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> NotificationResult<bool>;
}
