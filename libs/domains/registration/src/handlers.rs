use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use messaging::Publisher;
use serde_json::json;
use std::sync::Arc;

use crate::error::RegistrationResult;
use crate::models::{ConfirmationRequest, RegistrationRequest, normalize_email};
use crate::repository::RegistrationRepository;
use crate::service::ConfirmationService;

struct ApiState<R: RegistrationRepository> {
    requests: Publisher,
    confirmations: ConfirmationService<R>,
}

/// Create the registration router.
///
/// `requests` publishes to the request exchange; the code itself is issued by
/// whichever request listener consumes the message.
pub fn router<R: RegistrationRepository + 'static>(
    requests: Publisher,
    confirmations: ConfirmationService<R>,
) -> Router {
    let state = Arc::new(ApiState {
        requests,
        confirmations,
    });

    Router::new()
        .route("/", get(service_info))
        .route("/request-registration", post(request_registration::<R>))
        .route("/register", post(register::<R>))
        .with_state(state)
}

async fn service_info() -> impl IntoResponse {
    Json(json!({
        "service": "registration",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["POST /request-registration", "POST /register"],
    }))
}

async fn request_registration<R: RegistrationRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Json(input): Json<RegistrationRequest>,
) -> RegistrationResult<StatusCode> {
    let email = normalize_email(&input.email)?;
    state.requests.publish(email.as_bytes()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn register<R: RegistrationRepository>(
    State(state): State<Arc<ApiState<R>>>,
    Json(input): Json<ConfirmationRequest>,
) -> RegistrationResult<StatusCode> {
    let confirmed = state
        .confirmations
        .confirm(input.email.trim(), input.confirmation_code)
        .await?;

    if confirmed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::BAD_REQUEST)
    }
}
