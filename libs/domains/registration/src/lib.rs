//! Registration Domain
//!
//! Two-step email verification: a requested registration mints a confirmation
//! code and announces it for delivery, and a later confirmation with the same
//! code completes the registration.
//!
//! ```text
//! POST /request-registration ──▶ request exchange ──▶ RegistrationRequestHandler
//!                                                           │
//!                                          RegistrationRequestService
//!                                           store code ─▶ publish notification
//!
//! POST /register ──▶ ConfirmationService ──▶ code matches? save registration
//! ```

pub mod code;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod topology;

pub use code::{ConfirmationCodeGenerator, RandomCodeGenerator};
pub use error::{RegistrationError, RegistrationResult};
pub use handler::RegistrationRequestHandler;
pub use models::{ConfirmationRequest, MAX_EMAIL_LENGTH, RegistrationRequest};
pub use postgres::PostgresRegistrationRepository;
pub use repository::{InMemoryRegistrationRepository, RegistrationRepository};
pub use service::{ConfirmationService, RegistrationRequestService};
