use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RegistrationResult;

/// Pending confirmation codes and completed registrations.
///
/// Each call is atomic on its own; callers get no cross-call transaction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    /// Store `code` as the outstanding code for `email`, replacing any earlier one.
    async fn save_pending_request(&self, email: &str, code: Uuid) -> RegistrationResult<()>;

    async fn find_pending_code(&self, email: &str) -> RegistrationResult<Option<Uuid>>;

    /// Record a completed registration. Saving the same email twice is not an error.
    async fn save_registration(&self, email: &str) -> RegistrationResult<()>;

    async fn registration_exists(&self, email: &str) -> RegistrationResult<bool>;
}

/// In-memory implementation of RegistrationRepository (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistrationRepository {
    pending: Arc<RwLock<HashMap<String, Uuid>>>,
    registrations: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryRegistrationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationRepository for InMemoryRegistrationRepository {
    async fn save_pending_request(&self, email: &str, code: Uuid) -> RegistrationResult<()> {
        self.pending.write().await.insert(email.to_string(), code);
        Ok(())
    }

    async fn find_pending_code(&self, email: &str) -> RegistrationResult<Option<Uuid>> {
        Ok(self.pending.read().await.get(email).copied())
    }

    async fn save_registration(&self, email: &str) -> RegistrationResult<()> {
        self.registrations.write().await.insert(email.to_string());
        Ok(())
    }

    async fn registration_exists(&self, email: &str) -> RegistrationResult<bool> {
        Ok(self.registrations.read().await.contains(email))
    }
}
