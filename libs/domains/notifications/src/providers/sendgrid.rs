//! SendGrid v3 mail/send provider.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_SENDGRID_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    /// Sender address.
    pub from_email: String,
    /// Base URL without the `/v3` suffix, so tests can point it at a fake server.
    pub api_url: String,
}

impl SendGridConfig {
    pub fn new(api_key: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from_email: from_email.into(),
            api_url: DEFAULT_SENDGRID_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/v3/mail/send", self.api_url)
    }
}

pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

impl SendGridRequest {
    fn plain_text(from: &str, email: &EmailContent) -> Self {
        Self {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: email.to_email.clone(),
                }],
            }],
            from: EmailAddress {
                email: from.to_string(),
            },
            subject: email.subject.clone(),
            content: vec![Content {
                content_type: "text/plain".to_string(),
                value: email.text_body.clone(),
            }],
        }
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        let request = SendGridRequest::plain_text(&self.config.from_email, email);

        debug!(to = %email.to_email, subject = %email.subject, "Sending email via SendGrid");

        let response = self
            .client
            .post(self.config.send_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.is_success() {
            info!(to = %email.to_email, message_id = ?message_id, "Email accepted by SendGrid");
        } else {
            let body = response.text().await.unwrap_or_default();
            let details = match serde_json::from_str::<SendGridError>(&body) {
                Ok(parsed) => parsed
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join(", "),
                Err(_) => body,
            };
            warn!(to = %email.to_email, status = %status, error = %details, "SendGrid rejected email");
        }

        Ok(SentEmail {
            message_id,
            accepted: status.is_success(),
            status: status.as_u16(),
        })
    }

    fn name(&self) -> &'static str {
        "SendGrid"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        if self.config.api_key.is_empty() {
            return Err(NotificationError::ConfigError(
                "SendGrid API key is empty".to_string(),
            ));
        }
        Ok(true)
    }
}
