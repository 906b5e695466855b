use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::NotificationResult;
use crate::models::NotificationRecord;

/// Audit store for sent confirmation emails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Record that a confirmation email carrying `code` was sent to `email`.
    async fn save(&self, email: &str, code: Uuid) -> NotificationResult<()>;

    /// Every notification sent to `email`, oldest first.
    async fn list_for_email(&self, email: &str) -> NotificationResult<Vec<NotificationRecord>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryNotificationRepository {
    records: Arc<RwLock<Vec<NotificationRecord>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn save(&self, email: &str, code: Uuid) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(NotificationRecord {
            id,
            email: email.to_string(),
            confirmation_code: code,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_for_email(&self, email: &str) -> NotificationResult<Vec<NotificationRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.email == email).cloned().collect())
    }
}
