//! Confirmation code minting.

use uuid::Uuid;

/// Source of confirmation codes.
///
/// Implemented for plain closures so tests can mint predictable codes.
pub trait ConfirmationCodeGenerator: Send + Sync {
    fn generate(&self) -> Uuid;
}

/// Random version-4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl ConfirmationCodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}

impl<F> ConfirmationCodeGenerator for F
where
    F: Fn() -> Uuid + Send + Sync,
{
    fn generate(&self) -> Uuid {
        self()
    }
}
