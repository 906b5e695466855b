//! Liveness, readiness and metrics endpoints for consumer processes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub subscribed: bool,
}

#[derive(Debug, Default)]
struct HealthStateInner {
    broker_connected: bool,
    subscribed: bool,
    last_error: Option<String>,
}

/// Shared health flags, updated by the service as it starts and stops.
#[derive(Clone, Default)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    pub async fn set_subscribed(&self, subscribed: bool) {
        self.inner.write().await.subscribed = subscribed;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.inner.write().await.last_error = error;
    }

    /// Liveness only fails once a fatal error was recorded.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.last_error.is_none()
    }

    /// Ready once connected and subscribed.
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.subscribed
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = match (&inner.last_error, inner.broker_connected && inner.subscribed) {
            (Some(error), _) => format!("unhealthy: {error}"),
            (None, true) => "healthy".to_string(),
            (None, false) => "starting".to_string(),
        };
        HealthStatus {
            status,
            broker_connected: inner.broker_connected,
            subscribed: inner.subscribed,
        }
    }
}

/// HTTP server exposing `/health`, `/ready` and optionally `/metrics`.
pub struct HealthServer {
    address: String,
    state: HealthState,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl HealthServer {
    pub fn new(address: impl Into<String>, state: HealthState) -> Self {
        Self {
            address: address.into(),
            state,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .with_state(self.state.clone());

        if let Some(handle) = self.metrics_handle.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.address).await?;
        info!(addr = %self.address, "Health server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let code = if state.is_alive().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(state.status().await))
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let code = if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(state.status().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_status(router: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_ready_only_after_subscribing() {
        let state = HealthState::new();
        let server = HealthServer::new("127.0.0.1:0", state.clone());

        let (code, body) = get_status(server.router(), "/ready").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");

        state.set_broker_connected(true).await;
        state.set_subscribed(true).await;

        let (code, body) = get_status(server.router(), "/ready").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_health_fails_after_fatal_error() {
        let state = HealthState::new();
        let server = HealthServer::new("127.0.0.1:0", state.clone());

        let (code, _) = get_status(server.router(), "/health").await;
        assert_eq!(code, StatusCode::OK);

        state.set_error(Some("broker connection lost".to_string())).await;
        let (code, body) = get_status(server.router(), "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy: broker connection lost");
    }
}
