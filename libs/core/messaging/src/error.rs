//! Error types for broker operations and message handling.

use std::fmt;
use thiserror::Error;

/// Error categories decide what happens to a message whose handler failed.
///
/// - **Transient**: temporary failure (timeout, upstream unavailable). Under
///   ack-on-completion the message is requeued.
/// - **Permanent**: retrying cannot help (malformed payload). The message is
///   rejected without requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl ErrorCategory {
    /// Whether a message that failed with this category should go back on the queue.
    pub fn should_requeue(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by topology, publish and consume operations.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Redeclaring an entity with parameters that differ from the existing one.
    #[error("{entity} '{name}' already exists with different parameters: {details}")]
    TopologyConflict {
        entity: &'static str,
        name: String,
        details: String,
    },

    #[error("exchange '{0}' not found")]
    ExchangeNotFound(String),

    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error("unsupported exchange kind '{0}'")]
    UnsupportedExchangeKind(String),

    #[error("invalid binding on exchange '{exchange}': {details}")]
    InvalidBinding { exchange: String, details: String },

    #[error("invalid ack policy '{0}' (expected 'receipt' or 'completion')")]
    InvalidAckPolicy(String),

    #[error("failed to publish to exchange '{exchange}': {details}")]
    Publish { exchange: String, details: String },

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Structural misconfiguration that should abort startup instead of being retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            MessagingError::TopologyConflict { .. }
                | MessagingError::ExchangeNotFound(_)
                | MessagingError::QueueNotFound(_)
                | MessagingError::UnsupportedExchangeKind(_)
                | MessagingError::InvalidBinding { .. }
                | MessagingError::InvalidAckPolicy(_)
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            MessagingError::Connection(_)
            | MessagingError::Publish { .. }
            | MessagingError::Consumer(_) => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Error returned by a [`MessageHandler`](crate::MessageHandler).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HandlerError::Transient { .. } => ErrorCategory::Transient,
            HandlerError::Permanent { .. } => ErrorCategory::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_category() {
        assert_eq!(
            HandlerError::transient("smtp timeout").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            HandlerError::permanent("bad address").category(),
            ErrorCategory::Permanent
        );

        let decode = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        assert_eq!(
            HandlerError::permanent_with_source("malformed message", decode).category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_requeue_only_transient() {
        assert!(ErrorCategory::Transient.should_requeue());
        assert!(!ErrorCategory::Permanent.should_requeue());
    }

    #[test]
    fn test_configuration_errors() {
        let conflict = MessagingError::TopologyConflict {
            entity: "queue",
            name: "registration-notification".to_string(),
            details: "durable mismatch".to_string(),
        };
        assert!(conflict.is_configuration_error());
        assert_eq!(conflict.category(), ErrorCategory::Permanent);
        assert!(conflict.to_string().contains("registration-notification"));

        let dropped = MessagingError::Connection("reset by peer".to_string());
        assert!(!dropped.is_configuration_error());
        assert_eq!(dropped.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_handler_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = HandlerError::transient_with_source("send failed", io);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("timed out"));
    }
}
