//! In-memory adapters.
//!
//! Implement every storage port on `tokio::sync::RwLock`-guarded maps with
//! the same atomicity guarantees as the PostgreSQL adapters. Used by tests
//! and local development.

mod audit_log;
mod plan_repository;
mod provider_event_store;
mod transaction_repository;
mod user_repository;

pub use audit_log::InMemoryAuditLog;
pub use plan_repository::InMemoryPlanRepository;
pub use provider_event_store::InMemoryProviderEventStore;
pub use transaction_repository::InMemoryTransactionRepository;
pub use user_repository::InMemoryUserRepository;
