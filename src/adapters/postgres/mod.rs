//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! This module provides adapters for PostgreSQL-backed persistence:
//! - `PostgresUserRepository` - Billing view of users, versioned updates
//! - `PostgresPlanRepository` - Plan catalog with set-once provider ids
//! - `PostgresTransactionRepository` - Payments, unique per `source_ref`
//! - `PostgresAuditLog` - Rows in `system_logs`
//! - `PostgresProviderEventStore` - Webhook dedup gate
//!
//! Schema lives in `migrations/`.

mod audit_log;
mod plan_repository;
mod provider_event_store;
mod transaction_repository;
mod user_repository;

pub use audit_log::PostgresAuditLog;
pub use plan_repository::PostgresPlanRepository;
pub use provider_event_store::PostgresProviderEventStore;
pub use transaction_repository::PostgresTransactionRepository;
pub use user_repository::PostgresUserRepository;

use sqlx::PgPool;

use crate::config::DatabaseConfig;

/// Opens a connection pool using the configured sizing.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    config.pool_options().connect(&config.url).await
}

/// Applies pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
