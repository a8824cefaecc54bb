//! Billing handlers.
//!
//! Command and query handlers that keep local billing state in step with
//! the payment provider:
//!
//! ## Commands
//! - Syncing a plan's catalog entry (product and price)
//! - Provisioning a user's customer and subscription
//! - Assigning a plan to a user
//! - Changing a plan's pricing
//! - Handling provider webhooks
//! - Purging finished webhook dedup records
//!
//! ## Queries
//! - Validating a plan against the provider catalog

mod assign_plan;
mod billing_event_dispatcher;
mod ensure_customer;
mod handle_provider_webhook;
mod purge_provider_events;
mod sync_plan;
mod update_plan_pricing;
mod validate_plan;

#[cfg(test)]
pub(crate) mod test_support;

// Commands
pub use assign_plan::{AssignPlanCommand, AssignPlanHandler, AssignPlanResult};
pub use ensure_customer::{EnsureCustomerCommand, EnsureCustomerHandler};
pub use handle_provider_webhook::{
    HandleProviderWebhookCommand, HandleProviderWebhookHandler, HandleProviderWebhookResult,
};
pub use purge_provider_events::{
    PurgeProviderEventsCommand, PurgeProviderEventsHandler, PurgeProviderEventsResult,
};
pub use sync_plan::{SyncPlanCommand, SyncPlanHandler};
pub use update_plan_pricing::{
    UpdatePlanPricingCommand, UpdatePlanPricingHandler, UpdatePlanPricingResult,
};

// Queries
pub use validate_plan::{ValidatePlanHandler, ValidatePlanQuery};

// Event routing
pub use billing_event_dispatcher::BillingEventDispatcher;
