//! HTTP adapters - REST API implementations.
//!
//! `app_router` assembles the billing routes with the request middleware
//! stack: request ids, tracing and a per-request timeout.

pub mod billing;

use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use billing::{billing_router, BillingAppState, BillingPorts};

/// Builds the full application router.
pub fn app_router(state: BillingAppState, request_timeout: Duration) -> Router {
    billing_router().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryPlanRepository, InMemoryProviderEventStore,
        InMemoryTransactionRepository, InMemoryUserRepository,
    };
    use crate::adapters::stripe::MockProviderGateway;
    use crate::domain::billing::WebhookVerifier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> BillingAppState {
        let ports = BillingPorts {
            users: Arc::new(InMemoryUserRepository::new()),
            plans: Arc::new(InMemoryPlanRepository::new()),
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            events: Arc::new(InMemoryProviderEventStore::new()),
            gateway: Arc::new(MockProviderGateway::new()),
        };
        let verifier = WebhookVerifier::new(SecretString::new("whsec_test".to_string()));
        BillingAppState::new(ports, verifier, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn health_responds_ok_with_request_id() {
        let app = app_router(test_state(), Duration::from_secs(5));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn admin_route_requires_admin_header() {
        let app = app_router(test_state(), Duration::from_secs(5));

        let response = app
            .oneshot(
                Request::post("/admin/plans/pro/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_plan_is_404() {
        let app = app_router(test_state(), Duration::from_secs(5));

        let response = app
            .oneshot(
                Request::get("/admin/plans/ghost/validate")
                    .header("X-Admin-Id", "admin-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_without_signature_is_400() {
        let app = app_router(test_state(), Duration::from_secs(5));

        let response = app
            .oneshot(
                Request::post("/webhooks/provider")
                    .body(Body::from(r#"{"id":"evt_1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
