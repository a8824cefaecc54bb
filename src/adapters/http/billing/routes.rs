//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{
    assign_plan, handle_provider_webhook, health, repair_user, sync_plan, update_plan_pricing,
    validate_plan, BillingAppState,
};

/// Create the admin API router.
///
/// # Routes
///
/// All routes require the `X-Admin-Id` header.
/// - `POST /plans/:plan_id/sync` - Create missing provider product and price
/// - `GET /plans/:plan_id/validate` - Compare plan with provider catalog
/// - `PUT /plans/:plan_id/pricing` - Change price terms
/// - `POST /users/:user_id/repair` - Provision customer and subscription
/// - `PUT /users/:user_id/plan` - Move user to another plan
pub fn admin_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/plans/:plan_id/sync", post(sync_plan))
        .route("/plans/:plan_id/validate", get(validate_plan))
        .route("/plans/:plan_id/pricing", put(update_plan_pricing))
        .route("/users/:user_id/repair", post(repair_user))
        .route("/users/:user_id/plan", put(assign_plan))
}

/// Create the webhook router.
///
/// Separate from the admin routes because deliveries are authenticated by
/// signature, not by header.
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/provider", post(handle_provider_webhook))
}

/// Create the complete billing router, mounted at the root.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/admin", admin_routes())
        .nest("/webhooks", webhook_routes())
}
