//! Billing domain module.
//!
//! Plans, the billing view of users, provider events and the rules that
//! keep local billing state consistent with the payment provider.
//!
//! # Module Structure
//!
//! - `status` - Provider status to local status mapping
//! - `plan` - Plan catalog entries and their sync state
//! - `user` - User billing state and event-driven transitions
//! - `transaction` - Append-only payment records
//! - `audit` - Audit log entries
//! - `integrity` - Plan vs provider catalog comparison
//! - `outcome` - Step-by-step results of admin operations
//! - `provider_event` - Inbound event envelope and typed kinds
//! - `webhook_*` - Signature verification, errors and the dedup-gated processor

mod audit;
mod errors;
mod integrity;
mod outcome;
mod plan;
mod provider_event;
mod status;
mod transaction;
mod user;
mod webhook_errors;
mod webhook_processor;
mod webhook_verifier;

pub use audit::{
    AuditAction, AuditLogEntry, AuditLogEntryBuilder, AuditObjectType, PROVIDER_ACTOR,
    SYSTEM_ACTOR,
};
pub use errors::BillingError;
pub use integrity::{compare_catalog, Discrepancy, ValidationReport};
pub use outcome::{ProvisionReport, StepOutcome, SyncReport};
pub use plan::{normalize_currency, validate_price, BillingInterval, Plan, PlanSyncState};
pub use provider_event::{
    CheckoutSessionObject, InvoiceObject, PaymentIntentObject, ProviderEvent, ProviderEventData,
    ProviderEventKind, SubscriptionObject,
};
pub use status::{map_provider_status, LocalStatus};
pub use transaction::{payment_source_ref, Transaction};
pub use user::{BillingUser, SubscriptionSnapshot, TransitionOutcome};
pub use webhook_errors::WebhookError;
pub use webhook_processor::{
    IdempotentWebhookProcessor, WebhookDispatcher, WebhookResult, DEFAULT_EVENT_LEASE,
};
pub use webhook_verifier::{sign_payload, SignatureHeader, WebhookVerifier, DEFAULT_TOLERANCE_SECS};

#[cfg(test)]
pub use provider_event::ProviderEventBuilder;

/// Shared test fixtures for plans and users.
#[cfg(test)]
pub(crate) mod fixtures {
    pub use super::plan::fixtures::*;
    pub use super::user::fixtures::*;
}
