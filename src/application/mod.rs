//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Following CQRS, it separates command handlers (write) from query handlers (read).

pub mod handlers;

pub use handlers::billing::{
    // Commands
    AssignPlanCommand, AssignPlanHandler, AssignPlanResult,
    EnsureCustomerCommand, EnsureCustomerHandler,
    HandleProviderWebhookCommand, HandleProviderWebhookHandler, HandleProviderWebhookResult,
    PurgeProviderEventsCommand, PurgeProviderEventsHandler, PurgeProviderEventsResult,
    SyncPlanCommand, SyncPlanHandler,
    UpdatePlanPricingCommand, UpdatePlanPricingHandler, UpdatePlanPricingResult,
    // Queries
    ValidatePlanHandler, ValidatePlanQuery,
    // Event routing
    BillingEventDispatcher,
};
