//! Billing Sync server.
//!
//! Loads configuration, connects PostgreSQL and Stripe, serves the admin and
//! webhook API, and periodically purges finished webhook dedup records.

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use billing_sync::adapters::http::{app_router, BillingAppState, BillingPorts};
use billing_sync::adapters::postgres::{
    self, PostgresAuditLog, PostgresPlanRepository, PostgresProviderEventStore,
    PostgresTransactionRepository, PostgresUserRepository,
};
use billing_sync::adapters::stripe::{StripeConfig, StripeGateway};
use billing_sync::application::handlers::billing::{
    PurgeProviderEventsCommand, PurgeProviderEventsHandler,
};
use billing_sync::config::{AppConfig, SyncConfig};
use billing_sync::domain::billing::WebhookVerifier;
use billing_sync::ports::ProviderEventStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.server.environment.as_str(),
        stripe_test_mode = config.payment.is_test_mode(),
        "Starting billing-sync"
    );

    // Database
    tracing::info!(url = %config.database.redacted_url(), "Connecting to database");
    let pool = postgres::connect(&config.database).await?;
    if config.database.run_migrations {
        postgres::run_migrations(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    // Provider
    let stripe_config = StripeConfig::new(config.payment.api_key())
        .with_base_url(&config.payment.api_base_url)
        .with_timeouts(
            config.payment.request_timeout(),
            config.payment.connect_timeout(),
        );
    let gateway = Arc::new(StripeGateway::new(stripe_config)?);

    let events: Arc<dyn ProviderEventStore> =
        Arc::new(PostgresProviderEventStore::new(pool.clone()));
    let ports = BillingPorts {
        users: Arc::new(PostgresUserRepository::new(pool.clone())),
        plans: Arc::new(PostgresPlanRepository::new(pool.clone())),
        transactions: Arc::new(PostgresTransactionRepository::new(pool.clone())),
        audit: Arc::new(PostgresAuditLog::new(pool.clone())),
        events: events.clone(),
        gateway,
    };

    let verifier = WebhookVerifier::new(config.payment.webhook_secret())
        .with_tolerance(config.payment.webhook_tolerance_secs)
        .require_livemode(config.payment.require_livemode);
    let state = BillingAppState::new(ports, verifier, config.sync.event_lease());

    let purge_task = tokio::spawn(purge_loop(events, config.sync.clone()));

    let app = app_router(state, config.server.request_timeout());
    let addr = config.server.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge_task.abort();
    pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_filter));

    if config.server.json_logs() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn purge_loop(events: Arc<dyn ProviderEventStore>, config: SyncConfig) {
    let handler = PurgeProviderEventsHandler::new(events);
    let mut interval = tokio::time::interval(config.purge_interval());

    loop {
        interval.tick().await;
        let cmd = PurgeProviderEventsCommand {
            retention_days: config.event_retention_days,
        };
        if let Err(e) = handler.handle(cmd).await {
            tracing::warn!(error = %e, "Provider event purge failed");
        }
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
