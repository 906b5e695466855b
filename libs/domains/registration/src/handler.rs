//! Request-queue listener.

use async_trait::async_trait;
use messaging::{HandlerError, MessageHandler};
use std::sync::Arc;

use crate::models::parse_request_body;
use crate::repository::RegistrationRepository;
use crate::service::RegistrationRequestService;

/// Turns registration-request messages into issued confirmation codes.
pub struct RegistrationRequestHandler<R: RegistrationRepository> {
    service: Arc<RegistrationRequestService<R>>,
}

impl<R: RegistrationRepository> RegistrationRequestHandler<R> {
    pub fn new(service: Arc<RegistrationRequestService<R>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<R: RegistrationRepository + 'static> MessageHandler for RegistrationRequestHandler<R> {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let email = parse_request_body(body)
            .map_err(|e| HandlerError::permanent_with_source("malformed registration request", e))?;

        match self.service.generate_code_and_publish(&email).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => Err(HandlerError::transient_with_source(
                "registration request failed",
                e,
            )),
            Err(e) => Err(HandlerError::permanent_with_source(
                "registration request failed",
                e,
            )),
        }
    }

    fn name(&self) -> &'static str {
        "registration_request_handler"
    }
}
