//! HTTP adapter for billing endpoints.
//!
//! Exposes billing synchronization via REST API:
//! - `POST /webhooks/provider` - Handle provider webhooks
//! - `POST /admin/plans/:plan_id/sync` - Sync plan catalog entry
//! - `GET /admin/plans/:plan_id/validate` - Validate plan against provider
//! - `PUT /admin/plans/:plan_id/pricing` - Update plan pricing
//! - `POST /admin/users/:user_id/repair` - Provision customer and subscription
//! - `PUT /admin/users/:user_id/plan` - Assign plan
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{AdminActor, BillingApiError, BillingAppState, BillingPorts, WebhookApiError};
pub use routes::{admin_routes, billing_router, webhook_routes};
