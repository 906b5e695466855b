//! Error types for the notifications domain.

use sea_orm::sqlx;
use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// The provider could not be reached or the request failed in transit.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// The provider answered with a non-success status.
    #[error("Email to {to} rejected by {provider} (status {status})")]
    DeliveryRejected {
        provider: &'static str,
        to: String,
        status: u16,
    },

    /// The database could not be reached or aborted the statement.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The database refused the data itself, so a retry fails the same way.
    #[error("Database rejected the write: {0}")]
    DatabaseRejected(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl NotificationError {
    /// Whether trying again later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NotificationError::ProviderError(_) | NotificationError::DatabaseError(_) => true,
            NotificationError::DeliveryRejected { status, .. } => {
                *status == 429 || *status >= 500
            }
            NotificationError::DatabaseRejected(_) | NotificationError::ConfigError(_) => false,
        }
    }
}

/// SQLSTATE classes worth retrying: connection exceptions (08), transaction
/// rollbacks such as serialization failures (40), insufficient resources
/// (53), operator intervention (57) and system errors (58).
const TRANSIENT_SQLSTATE_CLASSES: [&str; 5] = ["08", "40", "53", "57", "58"];

/// Whether a database failure could clear up on retry.
///
/// Connection and pool failures are transient. Data and integrity errors,
/// like a value too long for its column, fail identically every time.
pub fn is_transient_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            is_transient_sqlx_error(e)
        }
        _ => false,
    }
}

fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            TRANSIENT_SQLSTATE_CLASSES
                .iter()
                .any(|class| code.starts_with(class))
        }),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::BeginFailed => true,
        _ => false,
    }
}

impl From<DbErr> for NotificationError {
    fn from(err: DbErr) -> Self {
        if is_transient_db_error(&err) {
            NotificationError::DatabaseError(err.to_string())
        } else {
            NotificationError::DatabaseRejected(err.to_string())
        }
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::ProviderError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> NotificationError {
        NotificationError::DeliveryRejected {
            provider: "SendGrid",
            to: "to@example.com".to_string(),
            status,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());
        assert!(!rejected(400).is_transient());
        assert!(!rejected(401).is_transient());
        assert!(NotificationError::ProviderError("timeout".into()).is_transient());
        assert!(!NotificationError::ConfigError("bad".into()).is_transient());
    }

    #[test]
    fn test_database_errors_split_by_cause() {
        let lost = DbErr::Conn(RuntimeErr::Internal("connection reset".into()));
        assert!(is_transient_db_error(&lost));
        assert!(NotificationError::from(lost).is_transient());

        let io = DbErr::Exec(RuntimeErr::SqlxError(std::sync::Arc::new(
            sqlx::Error::PoolTimedOut,
        )));
        assert!(is_transient_db_error(&io));

        let decode = DbErr::Query(RuntimeErr::SqlxError(std::sync::Arc::new(
            sqlx::Error::RowNotFound,
        )));
        assert!(!is_transient_db_error(&decode));

        let rejected = NotificationError::from(DbErr::Custom("value too long".into()));
        assert!(matches!(rejected, NotificationError::DatabaseRejected(_)));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_rejected_message() {
        assert_eq!(
            rejected(400).to_string(),
            "Email to to@example.com rejected by SendGrid (status 400)"
        );
    }
}
