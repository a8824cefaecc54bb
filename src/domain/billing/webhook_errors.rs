//! Webhook error types for provider event handling.
//!
//! Defines all error conditions that can occur during webhook processing,
//! with HTTP status code mapping and retryability semantics.

use http::StatusCode;
use thiserror::Error;

use super::errors::BillingError;
use crate::domain::foundation::DomainError;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature header absent from the request.
    #[error("Missing signature header")]
    MissingSignature,

    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the tolerance window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Event timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Test-mode event delivered to an endpoint requiring live mode.
    #[error("Livemode mismatch")]
    LivemodeMismatch,

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required metadata field missing from webhook event.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// The event cannot be applied; redelivery will not help.
    #[error("Event rejected: {0}")]
    Rejected(String),

    /// The provider customer does not map to a local user yet.
    #[error("Customer not resolved: {0}")]
    CustomerNotResolved(String),

    /// Another delivery of the same event is being processed.
    #[error("Event in progress: {0}")]
    InProgress(String),

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// A provider call made while handling the event failed transiently.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this event.
    ///
    /// Retryable errors indicate temporary failures that may succeed
    /// on subsequent attempts (database issues, eventual consistency).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::Database(_)
                | WebhookError::ProviderUnavailable(_)
                | WebhookError::CustomerNotResolved(_)
                | WebhookError::InProgress(_)
        )
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// Status codes determine the provider's retry behavior:
    /// - 2xx: Event acknowledged, no retry
    /// - 4xx: Client error, no retry (409 is retried)
    /// - 5xx: Server error, will retry
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Auth failures - don't retry
            WebhookError::InvalidSignature | WebhookError::TimestampOutOfRange => {
                StatusCode::UNAUTHORIZED
            }

            // Bad request - don't retry
            WebhookError::MissingSignature
            | WebhookError::InvalidTimestamp
            | WebhookError::LivemodeMismatch
            | WebhookError::ParseError(_)
            | WebhookError::MissingMetadata(_) => StatusCode::BAD_REQUEST,

            // Acknowledged so the provider stops redelivering
            WebhookError::Ignored(_) | WebhookError::Rejected(_) => StatusCode::OK,

            WebhookError::InProgress(_) => StatusCode::CONFLICT,

            // Server errors - will retry
            WebhookError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::CustomerNotResolved(_) | WebhookError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns true if the error was raised before any business logic ran.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
                | WebhookError::LivemodeMismatch
        )
    }
}

impl From<BillingError> for WebhookError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::ProviderUnavailable(msg) => WebhookError::ProviderUnavailable(msg),
            BillingError::Database(msg) | BillingError::ConcurrentModification(msg) => {
                WebhookError::Database(msg)
            }
            BillingError::AlreadyProcessed(msg) => WebhookError::Ignored(msg),
            other => WebhookError::Rejected(other.to_string()),
        }
    }
}

/// Converts DomainError to WebhookError for repository operations.
impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::from(BillingError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ══════════════════════════════════════════════════════════════
    // Error Display Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn invalid_signature_displays_correctly() {
        assert_eq!(format!("{}", WebhookError::InvalidSignature), "Invalid signature");
    }

    #[test]
    fn missing_metadata_displays_field_name() {
        let err = WebhookError::MissingMetadata("userId");
        assert_eq!(format!("{}", err), "Missing metadata: userId");
    }

    // ══════════════════════════════════════════════════════════════
    // Retry semantics
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn transient_failures_are_retryable() {
        assert!(WebhookError::Database("down".into()).is_retryable());
        assert!(WebhookError::ProviderUnavailable("timeout".into()).is_retryable());
        assert!(WebhookError::CustomerNotResolved("cus_1".into()).is_retryable());
        assert!(WebhookError::InProgress("evt_1".into()).is_retryable());
    }

    #[test]
    fn terminal_failures_are_not_retryable() {
        assert!(!WebhookError::InvalidSignature.is_retryable());
        assert!(!WebhookError::MissingMetadata("planId").is_retryable());
        assert!(!WebhookError::Rejected("free plan".into()).is_retryable());
        assert!(!WebhookError::Ignored("unknown".into()).is_retryable());
    }

    #[test]
    fn retryable_errors_never_map_to_success() {
        for err in [
            WebhookError::Database("x".into()),
            WebhookError::ProviderUnavailable("x".into()),
            WebhookError::CustomerNotResolved("x".into()),
            WebhookError::InProgress("x".into()),
        ] {
            assert!(!err.status_code().is_success(), "{}", err);
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Status codes
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn auth_failures_map_to_client_errors() {
        assert_eq!(WebhookError::InvalidSignature.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(WebhookError::TimestampOutOfRange.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(WebhookError::MissingSignature.status_code(), StatusCode::BAD_REQUEST);
        assert!(WebhookError::LivemodeMismatch.is_authentication_failure());
    }

    #[test]
    fn rejected_and_ignored_are_acknowledged() {
        assert_eq!(WebhookError::Rejected("x".into()).status_code(), StatusCode::OK);
        assert_eq!(WebhookError::Ignored("x".into()).status_code(), StatusCode::OK);
    }

    #[test]
    fn in_progress_maps_to_conflict() {
        assert_eq!(WebhookError::InProgress("evt".into()).status_code(), StatusCode::CONFLICT);
    }

    // ══════════════════════════════════════════════════════════════
    // Conversions
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn billing_errors_keep_retryability() {
        let transient: WebhookError = BillingError::ProviderUnavailable("503".into()).into();
        let terminal: WebhookError = BillingError::InconsistentState("free plan".into()).into();
        let conflict: WebhookError = BillingError::ConcurrentModification("u1".into()).into();

        assert!(transient.is_retryable());
        assert!(!terminal.is_retryable());
        assert!(conflict.is_retryable());
    }

    #[test]
    fn domain_errors_become_database_errors() {
        let err: WebhookError = DomainError::database("insert", "connection reset").into();
        assert!(matches!(err, WebhookError::Database(_)));
    }
}
