//! Notification Server
//!
//! Consumes notification messages and emails confirmation codes.
//!
//! ```text
//! registration-notification-exchange (direct, key 42)
//!   ↓
//! registration-notification queue
//!   ↓ Consumer (ack on receipt | on completion)
//! NotificationHandler ─▶ Notifier ─▶ SendGrid
//!                                └─▶ notifications table
//! ```
//!
//! Health, readiness and Prometheus metrics are served on `HEALTH_PORT`. If the
//! subscription stops receiving (for example the broker connection drops),
//! readiness is withdrawn and `run` returns the failure.

pub mod config;

use core_config::FromEnv;
use core_config::tracing::init_tracing;
use domain_notifications::providers::SendGridProvider;
use domain_notifications::topology::{
    NOTIFICATION_QUEUE, notification_exchange, notification_queue,
};
use domain_notifications::{
    EmailProvider, NotificationHandler, NotificationRepository, Notifier,
    PostgresNotificationRepository,
};
use eyre::{Result, WrapErr};
use messaging::{
    AmqpBroker, Broker, Consumer, ConsumerConfig, HealthServer, HealthState, Subscription,
    declare_and_bind,
};
use migration::{Migrator, MigratorTrait};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use config::Config;

/// Declare the notification topology and start consuming it.
pub async fn start<R>(
    broker: Arc<dyn Broker>,
    repository: R,
    provider: Arc<dyn EmailProvider>,
    config: &Config,
) -> Result<Subscription>
where
    R: NotificationRepository + 'static,
{
    declare_and_bind(
        broker.as_ref(),
        &notification_exchange(),
        &notification_queue(&config.broker.queue_type),
    )
    .await
    .wrap_err("Failed to declare notification topology")?;

    let handler = NotificationHandler::new(Notifier::new(repository, provider));

    Consumer::new(
        broker,
        ConsumerConfig::new(NOTIFICATION_QUEUE).with_ack_policy(config.broker.ack_policy),
    )
    .listen(Arc::new(handler))
    .await
    .wrap_err("Failed to subscribe to the notification queue")
}

/// Run the notification server until SIGINT or SIGTERM.
pub async fn run() -> Result<()> {
    let config = Config::from_env().wrap_err("Failed to load configuration")?;
    init_tracing(&config.environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        ack_policy = ?config.broker.ack_policy,
        "Starting notification server"
    );

    let metrics = messaging::init_metrics().wrap_err("Failed to install metrics recorder")?;

    let health = HealthState::new();
    let (stop_health, health_stopped) = oneshot::channel::<()>();
    let health_server =
        HealthServer::new(config.health.address(), health.clone()).with_metrics(metrics);
    let mut health_task = tokio::spawn(health_server.run(async move {
        let _ = health_stopped.await;
    }));

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
    health.set_broker_connected(true).await;

    let provider = SendGridProvider::new(config.sendgrid.clone());
    if let Err(e) = provider.health_check().await {
        warn!(error = %e, "Email provider is misconfigured");
        health.set_error(Some(e.to_string())).await;
    }

    let subscription = start(
        broker.clone(),
        PostgresNotificationRepository::new(db.clone()),
        Arc::new(provider),
        &config,
    )
    .await?;
    health.set_subscribed(true).await;
    info!(queue = %subscription.queue(), "Notification server ready");

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = subscription.closed() => {
            error!(queue = %subscription.queue(), "Notification subscription stopped receiving");
        }
        result = &mut health_task => {
            error!(result = ?result, "Health server stopped unexpectedly");
        }
    }

    info!("Shutting down: cancelling subscription and closing connections");
    health.set_subscribed(false).await;
    let subscription_result = subscription.cancel().await;
    if let Err(e) = &subscription_result {
        error!(error = %e, "Notification subscription failed");
    }
    if let Err(e) = broker.close().await {
        error!(error = %e, "Failed to close broker connection");
    }
    health.set_broker_connected(false).await;
    if let Err(e) = db.close().await {
        error!(error = %e, "Failed to close PostgreSQL connection");
    }

    let _ = stop_health.send(());
    if !health_task.is_finished() {
        match health_task.await {
            Ok(Err(e)) => error!(error = %e, "Health server failed"),
            Err(e) => error!(error = %e, "Health server panicked"),
            Ok(Ok(())) => {}
        }
    }

    subscription_result.wrap_err("Notification subscription failed")?;
    info!("Notification server stopped");
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
