//! Provider that records emails instead of sending them.

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Copy, Debug)]
enum Behaviour {
    Accept,
    Reject(u16),
    Unreachable,
}

/// Captures sent emails for assertions. Clones share the captured list.
#[derive(Clone)]
pub struct RecordingEmailProvider {
    sent: Arc<Mutex<Vec<EmailContent>>>,
    notify: Arc<Notify>,
    behaviour: Behaviour,
}

impl RecordingEmailProvider {
    pub fn new() -> Self {
        Self::with_behaviour(Behaviour::Accept)
    }

    /// Answers every send with a non-success `status`.
    pub fn rejecting(status: u16) -> Self {
        Self::with_behaviour(Behaviour::Reject(status))
    }

    /// Fails every send as if the provider could not be reached.
    pub fn unreachable() -> Self {
        Self::with_behaviour(Behaviour::Unreachable)
    }

    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            behaviour,
        }
    }

    pub async fn sent_emails(&self) -> Vec<EmailContent> {
        self.sent.lock().await.clone()
    }

    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent.lock().await.iter().any(|e| e.to_email == email)
    }

    /// Wait until at least `count` emails were accepted.
    pub async fn wait_for(&self, count: usize) -> Vec<EmailContent> {
        loop {
            let notified = self.notify.notified();
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            notified.await;
        }
    }
}

impl Default for RecordingEmailProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        match self.behaviour {
            Behaviour::Accept => {
                let mut sent = self.sent.lock().await;
                sent.push(email.clone());
                let message_id = format!("recorded-{}", sent.len());
                drop(sent);
                self.notify.notify_waiters();
                Ok(SentEmail {
                    message_id: Some(message_id),
                    accepted: true,
                    status: 202,
                })
            }
            Behaviour::Reject(status) => Ok(SentEmail {
                message_id: None,
                accepted: false,
                status,
            }),
            Behaviour::Unreachable => Err(NotificationError::ProviderError(
                "connection refused".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(!matches!(self.behaviour, Behaviour::Unreachable))
    }
}
