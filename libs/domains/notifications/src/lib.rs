//! Notifications Domain
//!
//! Delivers confirmation codes by email.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ notification queue   │  ← {"email", "confirmationCode"}
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ NotificationHandler  │  ← decodes, classifies failures
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │      Notifier        │  ← send, then record
//! └─────┬──────────┬─────┘
//!       │          │
//! ┌─────▼────┐ ┌───▼──────────────────┐
//! │ Provider │ │ NotificationRepository│
//! └──────────┘ └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     NotificationHandler, Notifier, PostgresNotificationRepository,
//!     providers::{SendGridConfig, SendGridProvider},
//! };
//!
//! let provider = SendGridProvider::new(SendGridConfig::new(api_key, from));
//! let notifier = Notifier::new(PostgresNotificationRepository::new(db), Arc::new(provider));
//! let subscription = consumer.listen(Arc::new(NotificationHandler::new(notifier))).await?;
//! ```

pub mod error;
pub mod handler;
pub mod models;
pub mod notifier;
pub mod postgres;
pub mod providers;
pub mod repository;
pub mod topology;

pub use error::{NotificationError, NotificationResult, is_transient_db_error};
pub use handler::NotificationHandler;
pub use models::{CONFIRMATION_SUBJECT, NotificationMessage, NotificationRecord, confirmation_body};
pub use notifier::Notifier;
pub use postgres::PostgresNotificationRepository;
pub use providers::{EmailContent, EmailProvider, SentEmail};
pub use repository::{InMemoryNotificationRepository, NotificationRepository};
