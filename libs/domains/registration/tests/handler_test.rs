//! Handler tests for the registration domain
//!
//! These drive the HTTP router with the in-memory broker and repository and
//! check status codes and what reaches the request queue.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain_registration::topology::{
    DEFAULT_REQUEST_QUEUE as REQUEST_QUEUE, request_exchange, request_queue,
};
use domain_registration::*;
use http_body_util::BodyExt;
use messaging::{Broker, InMemoryBroker, Publisher, declare_and_bind};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt; // For oneshot()
use uuid::Uuid;

async fn app(broker: &InMemoryBroker, repository: InMemoryRegistrationRepository) -> Router {
    let exchange = request_exchange("1");
    declare_and_bind(broker, &exchange, &request_queue(REQUEST_QUEUE, "quorum"))
        .await
        .unwrap();

    handlers::router(
        Publisher::new(Arc::new(broker.clone()), exchange),
        ConfirmationService::new(repository),
    )
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_request_registration_publishes_email() {
    let broker = InMemoryBroker::new();
    let app = app(&broker, InMemoryRegistrationRepository::new()).await;

    let response = app
        .oneshot(post_json(
            "/request-registration",
            json!({"email": "to@example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = broker.get(REQUEST_QUEUE).await.unwrap().unwrap();
    assert_eq!(body, b"to@example.com");
}

#[tokio::test]
async fn test_request_registration_rejects_invalid_email() {
    let broker = InMemoryBroker::new();
    let app = app(&broker, InMemoryRegistrationRepository::new()).await;

    let response = app
        .oneshot(post_json("/request-registration", json!({"email": "nope"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "BadRequest");
    assert_eq!(broker.message_count(REQUEST_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_request_registration_rejects_oversized_email() {
    let broker = InMemoryBroker::new();
    let app = app(&broker, InMemoryRegistrationRepository::new()).await;
    let email = format!("{}@example.com", "a".repeat(320));

    let response = app
        .oneshot(post_json("/request-registration", json!({"email": email})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(broker.message_count(REQUEST_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_register_with_matching_code() {
    let broker = InMemoryBroker::new();
    let repository = InMemoryRegistrationRepository::new();
    let code = Uuid::new_v4();
    repository
        .save_pending_request("to@example.com", code)
        .await
        .unwrap();
    let app = app(&broker, repository.clone()).await;

    let response = app
        .oneshot(post_json(
            "/register",
            json!({"email": "to@example.com", "confirmationCode": code}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(repository.registration_exists("to@example.com").await.unwrap());
}

#[tokio::test]
async fn test_register_with_wrong_code() {
    let broker = InMemoryBroker::new();
    let repository = InMemoryRegistrationRepository::new();
    repository
        .save_pending_request("to@example.com", Uuid::new_v4())
        .await
        .unwrap();
    let app = app(&broker, repository.clone()).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/register",
            json!({"email": "to@example.com", "confirmationCode": Uuid::new_v4()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/register",
            json!({"email": "nobody@example.com", "confirmationCode": Uuid::new_v4()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(!repository.registration_exists("to@example.com").await.unwrap());
}

#[tokio::test]
async fn test_register_rejects_malformed_code() {
    let broker = InMemoryBroker::new();
    let app = app(&broker, InMemoryRegistrationRepository::new()).await;

    let response = app
        .oneshot(post_json(
            "/register",
            json!({"email": "to@example.com", "confirmationCode": "1234"}),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_service_info() {
    let broker = InMemoryBroker::new();
    let app = app(&broker, InMemoryRegistrationRepository::new()).await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["service"], "registration");
}
