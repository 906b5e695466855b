//! Shared test utilities for domain testing
//!
//! - `TestDatabase`: PostgreSQL container with the workspace migrations applied
//!   (feature: "postgres")
//! - `TestRabbit`: RabbitMQ container (feature: "rabbitmq")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! Container-backed tests need Docker and are marked `#[ignore]` in the
//! domain crates; run them with `cargo test -- --ignored`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let email = builder.email("user");
//! }
//! ```

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "rabbitmq")]
mod rabbitmq;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::TestRabbit;

/// Builder for test data with deterministic randomization
///
/// Tests sharing one database stay isolated by deriving emails from their
/// own name.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Email address unique to this builder, e.g. `user-12345@example.com`.
    pub fn email(&self, label: &str) -> String {
        format!("{}-{}@example.com", label, self.seed)
    }
}
