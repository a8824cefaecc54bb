//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to the billing command/query handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::handlers::billing::{
    AssignPlanCommand, AssignPlanHandler, BillingEventDispatcher, EnsureCustomerCommand,
    EnsureCustomerHandler, HandleProviderWebhookCommand, HandleProviderWebhookHandler,
    SyncPlanCommand, SyncPlanHandler, UpdatePlanPricingCommand, UpdatePlanPricingHandler,
    ValidatePlanHandler, ValidatePlanQuery,
};
use crate::domain::billing::{BillingError, IdempotentWebhookProcessor, WebhookError, WebhookVerifier};
use crate::domain::foundation::{PlanId, UserId};
use crate::ports::{
    AuditLog, PlanRepository, ProviderEventStore, ProviderGateway, TransactionRepository,
    UserRepository,
};

use super::dto::{
    AssignPlanRequest, AssignPlanResponse, ErrorResponse, HealthResponse, UpdatePricingRequest,
    UpdatePricingResponse, WebhookAckResponse,
};

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Header naming the admin on whose behalf a request runs.
pub const ADMIN_HEADER: &str = "X-Admin-Id";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Port implementations the billing API is built from.
#[derive(Clone)]
pub struct BillingPorts {
    pub users: Arc<dyn UserRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub audit: Arc<dyn AuditLog>,
    pub events: Arc<dyn ProviderEventStore>,
    pub gateway: Arc<dyn ProviderGateway>,
}

/// Shared application state.
///
/// Handlers are built once; cloning the state only bumps reference counts.
#[derive(Clone)]
pub struct BillingAppState {
    pub sync_plan: Arc<SyncPlanHandler>,
    pub validate_plan: Arc<ValidatePlanHandler>,
    pub update_pricing: Arc<UpdatePlanPricingHandler>,
    pub ensure_customer: Arc<EnsureCustomerHandler>,
    pub assign_plan: Arc<AssignPlanHandler>,
    pub webhook: Arc<HandleProviderWebhookHandler>,
}

impl BillingAppState {
    /// Wires every billing handler from one set of ports.
    pub fn new(ports: BillingPorts, verifier: WebhookVerifier, event_lease: Duration) -> Self {
        let sync_plan = Arc::new(SyncPlanHandler::new(
            ports.plans.clone(),
            ports.gateway.clone(),
            ports.audit.clone(),
        ));
        let validate_plan = Arc::new(ValidatePlanHandler::new(
            ports.plans.clone(),
            ports.gateway.clone(),
        ));
        let ensure_customer = Arc::new(EnsureCustomerHandler::new(
            ports.users.clone(),
            ports.plans.clone(),
            ports.transactions.clone(),
            ports.gateway.clone(),
            ports.audit.clone(),
        ));
        let assign_plan = Arc::new(AssignPlanHandler::new(
            ports.users.clone(),
            ports.plans.clone(),
            ports.gateway.clone(),
            ports.audit.clone(),
            sync_plan.clone(),
            validate_plan.clone(),
            ensure_customer.clone(),
        ));
        let update_pricing = Arc::new(UpdatePlanPricingHandler::new(
            ports.plans.clone(),
            ports.gateway.clone(),
            ports.audit.clone(),
        ));

        let dispatcher = Arc::new(BillingEventDispatcher::new(
            ports.users,
            ports.plans,
            ports.transactions,
            ports.gateway,
            ports.audit,
        ));
        let processor = Arc::new(
            IdempotentWebhookProcessor::new(ports.events, dispatcher).with_lease(event_lease),
        );
        let webhook = Arc::new(HandleProviderWebhookHandler::new(verifier, processor));

        Self {
            sync_plan,
            validate_plan,
            update_pricing,
            ensure_customer,
            assign_plan,
            webhook,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Admin Context
// ════════════════════════════════════════════════════════════════════════════════

/// Admin on whose behalf a request runs, recorded as the audit actor.
///
/// Authentication happens in front of this service; the header is trusted.
#[derive(Debug, Clone)]
pub struct AdminActor {
    pub actor_id: String,
}

/// Rejection type for AdminActor extraction.
pub struct AdminRequired;

impl IntoResponse for AdminRequired {
    fn into_response(self) -> Response {
        let error = ErrorResponse::new("ADMIN_REQUIRED", "X-Admin-Id header is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AdminActor
where
    S: Send + Sync,
{
    type Rejection = AdminRequired;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let actor_id = parts
            .headers
            .get(ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AdminRequired)?;

        Ok(AdminActor {
            actor_id: actor_id.to_string(),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Admin Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /admin/plans/:plan_id/sync - Create missing provider product and price
pub async fn sync_plan(
    State(state): State<BillingAppState>,
    admin: AdminActor,
    Path(plan_id): Path<String>,
) -> Result<impl IntoResponse, BillingApiError> {
    let cmd = SyncPlanCommand {
        plan_id: PlanId::new(plan_id)?,
        actor_id: admin.actor_id,
    };

    let report = state.sync_plan.handle(cmd).await?;

    Ok(Json(report))
}

/// GET /admin/plans/:plan_id/validate - Compare a plan with the provider catalog
pub async fn validate_plan(
    State(state): State<BillingAppState>,
    _admin: AdminActor,
    Path(plan_id): Path<String>,
) -> Result<impl IntoResponse, BillingApiError> {
    let query = ValidatePlanQuery {
        plan_id: PlanId::new(plan_id)?,
    };

    let report = state.validate_plan.handle(query).await?;

    Ok(Json(report))
}

/// PUT /admin/plans/:plan_id/pricing - Change price terms
pub async fn update_plan_pricing(
    State(state): State<BillingAppState>,
    admin: AdminActor,
    Path(plan_id): Path<String>,
    Json(request): Json<UpdatePricingRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let cmd = UpdatePlanPricingCommand {
        plan_id: PlanId::new(plan_id)?,
        price: request.price,
        currency: request.currency,
        interval: request.interval,
        actor_id: admin.actor_id,
    };

    let result = state.update_pricing.handle(cmd).await?;

    Ok(Json(UpdatePricingResponse::from(result)))
}

/// POST /admin/users/:user_id/repair - Provision missing customer and subscription
pub async fn repair_user(
    State(state): State<BillingAppState>,
    admin: AdminActor,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, BillingApiError> {
    let cmd = EnsureCustomerCommand {
        user_id: UserId::new(user_id)?,
        actor_id: admin.actor_id,
    };

    let report = state.ensure_customer.handle(cmd).await?;

    Ok(Json(report))
}

/// PUT /admin/users/:user_id/plan - Move a user to another plan
pub async fn assign_plan(
    State(state): State<BillingAppState>,
    admin: AdminActor,
    Path(user_id): Path<String>,
    Json(request): Json<AssignPlanRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let cmd = AssignPlanCommand {
        user_id: UserId::new(user_id)?,
        plan_id: PlanId::new(request.plan_id)?,
        actor_id: admin.actor_id,
    };

    let result = state.assign_plan.handle(cmd).await?;

    Ok(Json(AssignPlanResponse::from(result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Handler
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/provider - Handle provider webhook events
///
/// The status code drives provider redelivery: 2xx acknowledges, 409 and
/// 5xx ask for another attempt.
pub async fn handle_provider_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    let cmd = HandleProviderWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let result = state.webhook.handle(cmd).await?;

    Ok(Json(WebhookAckResponse::from(result)))
}

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl From<crate::domain::foundation::ValidationError> for BillingApiError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        Self(BillingError::from(err))
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            BillingError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            BillingError::AlreadyProcessed(_)
            | BillingError::InconsistentState(_)
            | BillingError::IntegrityMismatch(_)
            | BillingError::ConcurrentModification(_) => StatusCode::CONFLICT,
            BillingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Billing request failed");
        }

        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

/// Webhook error rendered with the status the provider's retry logic expects.
#[derive(Debug)]
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

impl WebhookApiError {
    fn code(&self) -> &'static str {
        match &self.0 {
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::TimestampOutOfRange | WebhookError::InvalidTimestamp => {
                "INVALID_TIMESTAMP"
            }
            WebhookError::LivemodeMismatch => "LIVEMODE_MISMATCH",
            WebhookError::ParseError(_) => "PARSE_ERROR",
            WebhookError::MissingMetadata(_) => "MISSING_METADATA",
            WebhookError::Rejected(_) => "REJECTED",
            WebhookError::Ignored(_) => "IGNORED",
            WebhookError::CustomerNotResolved(_) => "CUSTOMER_NOT_RESOLVED",
            WebhookError::InProgress(_) => "IN_PROGRESS",
            WebhookError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            WebhookError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = ErrorResponse::new(self.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let response = BillingApiError(BillingError::plan_not_found("ghost")).into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn integrity_mismatch_maps_to_409() {
        let response =
            BillingApiError(BillingError::IntegrityMismatch("price drift".into())).into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn provider_outage_maps_to_503() {
        let response =
            BillingApiError(BillingError::ProviderUnavailable("timeout".into())).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn bad_signature_maps_to_401() {
        let response = WebhookApiError(WebhookError::InvalidSignature).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn in_progress_delivery_maps_to_409() {
        let response = WebhookApiError(WebhookError::InProgress("evt_1".into())).into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
