//! Structured results of administrator-triggered operations.
//!
//! Each provisioning step reports what happened to it on its own, so a
//! partial success (customer created, subscription failed) is visible as
//! such instead of collapsing into one pass/fail bit.

use serde::Serialize;

use crate::domain::foundation::{PlanId, UserId};

/// What happened to one provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// A provider object was created and its id persisted.
    Created { id: String },
    /// The id was already stored; nothing was called.
    AlreadyPresent { id: String },
    /// The step does not apply to this record.
    NotApplicable { reason: String },
    /// The step failed; earlier steps keep their results.
    Failed { reason: String, retryable: bool },
}

impl StepOutcome {
    pub fn created(id: impl Into<String>) -> Self {
        StepOutcome::Created { id: id.into() }
    }

    pub fn already_present(id: impl Into<String>) -> Self {
        StepOutcome::AlreadyPresent { id: id.into() }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        StepOutcome::NotApplicable {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        StepOutcome::Failed {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }

    pub fn is_created(&self) -> bool {
        matches!(self, StepOutcome::Created { .. })
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, StepOutcome::AlreadyPresent { .. })
    }

    /// The provider id this step produced or found.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            StepOutcome::Created { id } | StepOutcome::AlreadyPresent { id } => Some(id),
            _ => None,
        }
    }

    /// Renders `"<step> <verb>"`, e.g. `customer created`.
    pub fn describe(&self, step: &str) -> String {
        match self {
            StepOutcome::Created { .. } => format!("{} created", step),
            StepOutcome::AlreadyPresent { .. } => format!("{} already present", step),
            StepOutcome::NotApplicable { .. } => format!("{} not applicable", step),
            StepOutcome::Failed { reason, .. } => format!("{} failed: {}", step, reason),
        }
    }
}

fn steps_with<'a>(
    steps: &[(&'a str, &StepOutcome)],
    pred: fn(&StepOutcome) -> bool,
) -> Vec<&'a str> {
    steps
        .iter()
        .filter(|(_, outcome)| pred(outcome))
        .map(|(name, _)| *name)
        .collect()
}

/// Result of `sync_plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub plan_id: PlanId,
    pub product: StepOutcome,
    pub price: StepOutcome,
}

impl SyncReport {
    pub fn not_applicable(plan_id: PlanId) -> Self {
        Self {
            plan_id,
            product: StepOutcome::not_applicable("free plan"),
            price: StepOutcome::not_applicable("free plan"),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.product.is_failed() && !self.price.is_failed()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}, {}",
            self.product.describe("product"),
            self.price.describe("price")
        )
    }

    fn steps(&self) -> [(&'static str, &StepOutcome); 2] {
        [("product", &self.product), ("price", &self.price)]
    }

    pub fn created(&self) -> Vec<&'static str> {
        steps_with(&self.steps(), StepOutcome::is_created)
    }

    pub fn already_present(&self) -> Vec<&'static str> {
        steps_with(&self.steps(), StepOutcome::is_already_present)
    }
}

/// Result of `ensure_customer_and_subscription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub user_id: UserId,
    pub customer: StepOutcome,
    pub subscription: StepOutcome,
    /// Transactions whose user id was filled in after the customer resolved.
    pub backfilled_transactions: u64,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        !self.customer.is_failed() && !self.subscription.is_failed()
    }

    /// e.g. `customer created, subscription not applicable`.
    pub fn summary(&self) -> String {
        format!(
            "{}, {}",
            self.customer.describe("customer"),
            self.subscription.describe("subscription")
        )
    }

    fn steps(&self) -> [(&'static str, &StepOutcome); 2] {
        [("customer", &self.customer), ("subscription", &self.subscription)]
    }

    pub fn created(&self) -> Vec<&'static str> {
        steps_with(&self.steps(), StepOutcome::is_created)
    }

    pub fn already_present(&self) -> Vec<&'static str> {
        steps_with(&self.steps(), StepOutcome::is_already_present)
    }
}
