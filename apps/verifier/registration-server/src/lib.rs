//! Registration Server
//!
//! Serves the registration HTTP API and listens on the request queue.
//!
//! ```text
//! POST /request-registration ─▶ request exchange (x-consistent-hash)
//!                                     │
//!                                     ▼
//!                         request queue ─▶ RegistrationRequestHandler
//!                                                 │ store code
//!                                                 ▼
//!                                      notification exchange ─▶ notification-server
//! POST /register ─▶ ConfirmationService
//! ```
//!
//! The HTTP server shuts down when the request listener stops receiving, and
//! `run` returns the listener's failure.

pub mod config;

use axum::{Router, routing::get};
use core_config::FromEnv;
use core_config::tracing::init_tracing;
use domain_notifications::topology::{notification_exchange, notification_queue};
use domain_registration::topology::{request_exchange, request_queue};
use domain_registration::{
    ConfirmationService, PostgresRegistrationRepository, RegistrationRepository,
    RegistrationRequestHandler, RegistrationRequestService, handlers,
};
use eyre::{Result, WrapErr};
use messaging::{
    AmqpBroker, Broker, Consumer, ConsumerConfig, Publisher, Subscription, declare_and_bind,
};
use migration::{Migrator, MigratorTrait};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use config::Config;

/// A started registration server: its HTTP app and the request-queue subscription.
pub struct RegistrationServer {
    pub router: Router,
    pub subscription: Subscription,
}

/// Declare the topology, subscribe to the request queue and build the HTTP app.
///
/// Topology conflicts fail here, before anything is served.
pub async fn start<R>(
    broker: Arc<dyn Broker>,
    repository: R,
    config: &Config,
) -> Result<RegistrationServer>
where
    R: RegistrationRepository + Clone + 'static,
{
    let notifications = notification_exchange();
    declare_and_bind(
        broker.as_ref(),
        &notifications,
        &notification_queue(&config.broker.queue_type),
    )
    .await
    .wrap_err("Failed to declare notification topology")?;

    let requests = request_exchange(&config.binding_key);
    declare_and_bind(
        broker.as_ref(),
        &requests,
        &request_queue(&config.queue_name, &config.broker.queue_type),
    )
    .await
    .wrap_err("Failed to declare request topology")?;

    let request_service = Arc::new(RegistrationRequestService::new(
        repository.clone(),
        Publisher::new(broker.clone(), notifications),
    ));

    let subscription = Consumer::new(
        broker.clone(),
        ConsumerConfig::new(config.queue_name.clone()).with_ack_policy(config.broker.ack_policy),
    )
    .listen(Arc::new(RegistrationRequestHandler::new(request_service)))
    .await
    .wrap_err("Failed to subscribe to the request queue")?;

    let router = handlers::router(
        Publisher::new(broker, requests),
        ConfirmationService::new(repository),
    );

    Ok(RegistrationServer {
        router,
        subscription,
    })
}

/// Run the registration server until SIGINT or SIGTERM.
pub async fn run() -> Result<()> {
    let config = Config::from_env().wrap_err("Failed to load configuration")?;
    init_tracing(&config.environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting registration server"
    );

    let metrics = messaging::init_metrics().wrap_err("Failed to install metrics recorder")?;

    let db = sea_orm::Database::connect(&config.database.url)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    Migrator::up(&db, None)
        .await
        .wrap_err("Failed to run migrations")?;

    let broker: Arc<dyn Broker> = Arc::new(
        AmqpBroker::connect(&config.broker.url)
            .await
            .wrap_err("Failed to connect to the broker")?,
    );

    let server = start(
        broker.clone(),
        PostgresRegistrationRepository::new(db.clone()),
        &config,
    )
    .await?;

    let app = server
        .router
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!(addr = %config.server.address(), "Registration API listening");

    let listener_stopped = server.subscription.closed();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = listener_stopped => {
                    error!("Request listener stopped receiving, shutting down the API");
                }
            }
        })
        .await;

    info!("Shutting down: cancelling subscription and closing connections");
    let subscription_result = server.subscription.cancel().await;
    if let Err(e) = &subscription_result {
        error!(error = %e, "Request subscription failed");
    }
    if let Err(e) = broker.close().await {
        error!(error = %e, "Failed to close broker connection");
    }
    if let Err(e) = db.close().await {
        error!(error = %e, "Failed to close PostgreSQL connection");
    }

    served.wrap_err("Server error")?;
    subscription_result.wrap_err("Request subscription failed")?;
    info!("Registration server stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}
