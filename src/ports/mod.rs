//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Provider Ports
//!
//! - `ProviderGateway` - Payment provider catalog, customer and subscription calls
//!
//! ## Storage Ports
//!
//! - `UserRepository` - User billing fields with conditional provider-id writes
//! - `PlanRepository` - Plan catalog with conditional provider-id writes
//! - `TransactionRepository` - Append-only payment records
//! - `AuditLog` - Append-only audit sink
//! - `ProviderEventStore` - Dedup gate for provider webhook deliveries

mod audit_log;
mod plan_repository;
mod provider_event_store;
mod provider_gateway;
mod transaction_repository;
mod user_repository;

pub use audit_log::AuditLog;
pub use plan_repository::PlanRepository;
pub use provider_event_store::{
    claim_superseded, ClaimOutcome, EventDisposition, EventState, ProviderEventRecord,
    ProviderEventStore,
};
pub use provider_gateway::{
    CreateCustomerRequest, CreatePriceRequest, CreateProductRequest, CreateSubscriptionRequest,
    CustomerResolution, ProviderCustomer, ProviderError, ProviderErrorKind, ProviderGateway,
    ProviderPrice, ProviderProduct, ProviderSubscription,
};
pub use transaction_repository::{SaveResult, TransactionRepository};
pub use user_repository::{ConditionalWrite, UserRepository};
