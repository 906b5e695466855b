use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain_notifications::is_transient_db_error;
use messaging::{ErrorCategory, MessagingError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid email address: '{0}'")]
    InvalidEmail(String),

    #[error("Invalid registration request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Data or integrity error that repeats on every retry.
    #[error("Database rejected the write: {0}")]
    DatabaseRejected(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;

impl RegistrationError {
    /// Whether trying again later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistrationError::Database(_) => true,
            RegistrationError::Messaging(e) => e.category() == ErrorCategory::Transient,
            RegistrationError::InvalidEmail(_)
            | RegistrationError::InvalidRequest(_)
            | RegistrationError::DatabaseRejected(_) => false,
        }
    }
}

impl From<sea_orm::DbErr> for RegistrationError {
    fn from(err: sea_orm::DbErr) -> Self {
        if is_transient_db_error(&err) {
            RegistrationError::Database(err.to_string())
        } else {
            RegistrationError::DatabaseRejected(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            RegistrationError::InvalidEmail(_) | RegistrationError::InvalidRequest(_) => {
                tracing::info!(error = %self, "Rejected registration input");
                (StatusCode::BAD_REQUEST, "BadRequest")
            }
            RegistrationError::Messaging(_) => {
                tracing::warn!(error = %self, "Broker unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable")
            }
            RegistrationError::Database(_) | RegistrationError::DatabaseRejected(_) => {
                tracing::error!(error = %self, "Registration storage failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError")
            }
        };

        let body = Json(ErrorResponse {
            error,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let response = RegistrationError::InvalidEmail("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = RegistrationError::Database("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = RegistrationError::DatabaseRejected("too long".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = RegistrationError::Messaging(MessagingError::Connection("closed".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_transient_classification() {
        assert!(RegistrationError::Database("down".into()).is_transient());
        assert!(!RegistrationError::InvalidEmail("x".into()).is_transient());
        assert!(!RegistrationError::DatabaseRejected("x".into()).is_transient());
        assert!(
            !RegistrationError::Messaging(MessagingError::ExchangeNotFound("x".into()))
                .is_transient()
        );
    }

    #[test]
    fn test_db_errors_classified_on_conversion() {
        use sea_orm::{DbErr, RuntimeErr};

        let err = RegistrationError::from(DbErr::Conn(RuntimeErr::Internal("reset".into())));
        assert!(matches!(err, RegistrationError::Database(_)));
        assert!(err.is_transient());

        let err = RegistrationError::from(DbErr::Custom("value too long".into()));
        assert!(matches!(err, RegistrationError::DatabaseRejected(_)));
        assert!(!err.is_transient());
    }
}
