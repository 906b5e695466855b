use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject line of every confirmation email.
pub const CONFIRMATION_SUBJECT: &str = "Confirmation code";

/// Plain-text body carrying the hyphenated code.
pub fn confirmation_body(code: Uuid) -> String {
    format!("Your confirmation code is {code}")
}

/// Wire payload on the notification queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub email: String,
    pub confirmation_code: Uuid,
}

/// Audit row written after a confirmation email was accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub email: String,
    pub confirmation_code: Uuid,
    pub created_at: DateTime<Utc>,
}
