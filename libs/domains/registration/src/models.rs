use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RegistrationError, RegistrationResult};

/// Body of `POST /request-registration`, also accepted on the request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub email: String,
    pub confirmation_code: Uuid,
}

/// Longest address the `email` columns hold.
pub const MAX_EMAIL_LENGTH: usize = 320;

/// Trim `email` and check it looks like an address that fits in storage.
pub fn normalize_email(email: &str) -> RegistrationResult<String> {
    let email = email.trim();
    if email.chars().count() > MAX_EMAIL_LENGTH {
        return Err(RegistrationError::InvalidEmail(format!(
            "address longer than {MAX_EMAIL_LENGTH} characters"
        )));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email.to_string()),
        _ => Err(RegistrationError::InvalidEmail(email.to_string())),
    }
}

/// Decode a registration-request message: a bare address or `{"email": ..}`.
pub fn parse_request_body(body: &[u8]) -> RegistrationResult<String> {
    let text = std::str::from_utf8(body)
        .map_err(|e| RegistrationError::InvalidRequest(e.to_string()))?
        .trim();

    if text.starts_with('{') {
        let request: RegistrationRequest = serde_json::from_str(text)
            .map_err(|e| RegistrationError::InvalidRequest(e.to_string()))?;
        return normalize_email(&request.email);
    }

    normalize_email(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_request_is_camel_case() {
        let request: ConfirmationRequest = serde_json::from_str(
            r#"{"email":"to@example.com","confirmationCode":"8a7e5c1c-2f6d-4d0e-9b0a-3f1e2d4c5b6a"}"#,
        )
        .unwrap();
        assert_eq!(request.email, "to@example.com");
        assert_eq!(
            request.confirmation_code,
            Uuid::parse_str("8a7e5c1c-2f6d-4d0e-9b0a-3f1e2d4c5b6a").unwrap()
        );
    }

    #[test]
    fn test_parse_request_body() {
        assert_eq!(parse_request_body(b"to@example.com").unwrap(), "to@example.com");
        assert_eq!(
            parse_request_body(b" to@example.com\n").unwrap(),
            "to@example.com"
        );
        assert_eq!(
            parse_request_body(br#"{"email":"to@example.com"}"#).unwrap(),
            "to@example.com"
        );

        assert!(matches!(
            parse_request_body(b""),
            Err(RegistrationError::InvalidEmail(_))
        ));
        assert!(matches!(
            parse_request_body(br#"{"mail":"to@example.com"}"#),
            Err(RegistrationError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request_body(&[0xff, 0xfe]),
            Err(RegistrationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_normalize_email() {
        assert!(normalize_email("a@b").is_ok());
        assert!(normalize_email("@b").is_err());
        assert!(normalize_email("a@").is_err());
        assert!(normalize_email("plain").is_err());
    }

    #[test]
    fn test_normalize_email_length_limit() {
        let domain = "@example.com";
        let longest = format!("{}{domain}", "a".repeat(MAX_EMAIL_LENGTH - domain.len()));
        assert_eq!(normalize_email(&longest).unwrap(), longest);

        let too_long = format!("a{longest}");
        assert!(matches!(
            normalize_email(&too_long),
            Err(RegistrationError::InvalidEmail(_))
        ));
    }
}
