//! HTTP DTOs (Data Transfer Objects) for billing endpoints.
//!
//! These types define the JSON request/response structure for the admin and
//! webhook API. They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};

use crate::application::handlers::billing::{
    AssignPlanResult, HandleProviderWebhookResult, UpdatePlanPricingResult,
};
use crate::domain::billing::{
    BillingInterval, BillingUser, Plan, ProvisionReport, StepOutcome, WebhookResult,
};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to change a plan's price terms.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePricingRequest {
    /// Amount in minor currency units.
    pub price: i64,
    pub currency: String,
    pub interval: BillingInterval,
}

/// Request to move a user to another plan.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignPlanRequest {
    pub plan_id: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Plan as exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub is_free: bool,
    pub provider_product_id: Option<String>,
    pub provider_price_id: Option<String>,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id.to_string(),
            name: plan.name,
            price: plan.price,
            currency: plan.currency,
            interval: plan.interval,
            is_free: plan.is_free,
            provider_product_id: plan.provider_product_id,
            provider_price_id: plan.provider_price_id,
        }
    }
}

/// Billing state of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserBillingResponse {
    pub id: String,
    pub plan_id: String,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub subscription_status: String,
    /// Start of the current period (ISO 8601).
    pub subscription_start_date: Option<String>,
    /// End of the current period (ISO 8601).
    pub subscription_end_date: Option<String>,
}

impl From<BillingUser> for UserBillingResponse {
    fn from(user: BillingUser) -> Self {
        Self {
            id: user.id.to_string(),
            plan_id: user.plan_id.to_string(),
            provider_customer_id: user.provider_customer_id,
            provider_subscription_id: user.provider_subscription_id,
            subscription_status: user.subscription_status.to_string(),
            subscription_start_date: user
                .subscription_start_date
                .map(|t| t.as_datetime().to_rfc3339()),
            subscription_end_date: user
                .subscription_end_date
                .map(|t| t.as_datetime().to_rfc3339()),
        }
    }
}

/// Response for a pricing change.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePricingResponse {
    pub plan: PlanResponse,
    pub price: StepOutcome,
}

impl From<UpdatePlanPricingResult> for UpdatePricingResponse {
    fn from(result: UpdatePlanPricingResult) -> Self {
        Self {
            plan: PlanResponse::from(result.plan),
            price: result.price,
        }
    }
}

/// Response for a plan assignment.
#[derive(Debug, Clone, Serialize)]
pub struct AssignPlanResponse {
    pub user: UserBillingResponse,
    pub previous_plan_id: String,
    pub canceled_subscriptions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisionReport>,
}

impl From<AssignPlanResult> for AssignPlanResponse {
    fn from(result: AssignPlanResult) -> Self {
        Self {
            user: UserBillingResponse::from(result.user),
            previous_plan_id: result.previous_plan_id.to_string(),
            canceled_subscriptions: result.canceled_subscriptions,
            provisioning: result.provisioning,
        }
    }
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub received: bool,
    pub event_id: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<HandleProviderWebhookResult> for WebhookAckResponse {
    fn from(result: HandleProviderWebhookResult) -> Self {
        let (outcome, reason) = match result.outcome {
            WebhookResult::Processed => ("processed", None),
            WebhookResult::AlreadyProcessed => ("already_processed", None),
            WebhookResult::Ignored(reason) => ("ignored", Some(reason)),
            WebhookResult::Rejected(reason) => ("rejected", Some(reason)),
        };
        Self {
            received: true,
            event_id: result.event_id,
            outcome,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response DTO
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response for API errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
