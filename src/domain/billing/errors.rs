//! Billing error taxonomy.

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::ProviderError;

/// Errors surfaced by billing synchronization operations.
///
/// Provider failures bubble up unchanged in kind; callers decide whether to
/// retry based on [`BillingError::is_retryable`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BillingError {
    /// Network failure, timeout or 5xx from the provider. Safe to retry.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused the request (4xx). Needs attention.
    #[error("Payment provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The event or operation already took effect.
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    /// Records contradict each other; the operation was aborted.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Local plan and provider catalog disagree.
    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    pub fn user_not_found(id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: "User",
            id: id.to_string(),
        }
    }

    pub fn plan_not_found(id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: "Plan",
            id: id.to_string(),
        }
    }

    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProviderUnavailable(_)
                | BillingError::ConcurrentModification(_)
                | BillingError::Database(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            BillingError::ProviderRejected(_) => "PROVIDER_REJECTED",
            BillingError::NotFound { .. } => "NOT_FOUND",
            BillingError::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            BillingError::InconsistentState(_) => "INCONSISTENT_STATE",
            BillingError::IntegrityMismatch(_) => "INTEGRITY_MISMATCH",
            BillingError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            BillingError::Validation(_) => "VALIDATION_FAILED",
            BillingError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ConcurrencyConflict => BillingError::ConcurrentModification(err.message),
            ErrorCode::ValidationFailed => BillingError::Validation(err.message),
            ErrorCode::UserNotFound => BillingError::NotFound {
                entity: "User",
                id: err.details.get("id").cloned().unwrap_or(err.message),
            },
            ErrorCode::PlanNotFound => BillingError::NotFound {
                entity: "Plan",
                id: err.details.get("id").cloned().unwrap_or(err.message),
            },
            ErrorCode::NotFound => BillingError::NotFound {
                entity: "Record",
                id: err.message,
            },
            ErrorCode::Conflict => BillingError::InconsistentState(err.message),
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                BillingError::Database(err.message)
            }
        }
    }
}

impl From<ProviderError> for BillingError {
    fn from(err: ProviderError) -> Self {
        if err.is_retryable() {
            BillingError::ProviderUnavailable(err.to_string())
        } else {
            BillingError::ProviderRejected(err.to_string())
        }
    }
}

impl From<crate::domain::foundation::ValidationError> for BillingError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        BillingError::Validation(err.to_string())
    }
}
