use domain_notifications::NotificationMessage;
use messaging::Publisher;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::code::{ConfirmationCodeGenerator, RandomCodeGenerator};
use crate::error::RegistrationResult;
use crate::repository::RegistrationRepository;

/// Issues confirmation codes and announces them on the notification exchange.
pub struct RegistrationRequestService<R: RegistrationRepository> {
    repository: Arc<R>,
    notifications: Publisher,
    codes: Arc<dyn ConfirmationCodeGenerator>,
}

impl<R: RegistrationRepository> RegistrationRequestService<R> {
    pub fn new(repository: R, notifications: Publisher) -> Self {
        Self {
            repository: Arc::new(repository),
            notifications,
            codes: Arc::new(RandomCodeGenerator),
        }
    }

    pub fn with_code_generator(mut self, codes: impl ConfirmationCodeGenerator + 'static) -> Self {
        self.codes = Arc::new(codes);
        self
    }

    /// Mint a code for `email`, store it, then publish the notification.
    ///
    /// Nothing is published when storing fails. A publish failure leaves the
    /// new code stored.
    #[instrument(skip(self))]
    pub async fn generate_code_and_publish(&self, email: &str) -> RegistrationResult<Uuid> {
        let code = self.codes.generate();

        self.repository.save_pending_request(email, code).await?;
        debug!("Pending request stored");

        let message = NotificationMessage {
            email: email.to_string(),
            confirmation_code: code,
        };
        self.notifications.publish_json(&message).await?;

        info!("Confirmation code issued");
        Ok(code)
    }
}

/// Matches submitted codes against pending requests.
pub struct ConfirmationService<R: RegistrationRepository> {
    repository: Arc<R>,
}

impl<R: RegistrationRepository> ConfirmationService<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    /// Finalize the registration of `email` when `code` is its pending code.
    ///
    /// A missing or different code is `Ok(false)` and changes nothing. The
    /// pending code stays valid after a match, so confirming again succeeds.
    #[instrument(skip(self, code))]
    pub async fn confirm(&self, email: &str, code: Uuid) -> RegistrationResult<bool> {
        let Some(pending) = self.repository.find_pending_code(email).await? else {
            info!("No pending registration request");
            return Ok(false);
        };

        if pending != code {
            info!("Confirmation code mismatch");
            return Ok(false);
        }

        self.repository.save_registration(email).await?;
        info!("Registration confirmed");
        Ok(true)
    }

    pub async fn is_registered(&self, email: &str) -> RegistrationResult<bool> {
        self.repository.registration_exists(email).await
    }
}
