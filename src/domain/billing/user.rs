//! Billing view of a local user and the state transitions applied to it.

use serde::{Deserialize, Serialize};

use super::errors::BillingError;
use super::plan::Plan;
use super::status::{map_provider_status, LocalStatus};
use crate::domain::foundation::{PlanId, Timestamp, UserId};

/// The billing-relevant fields of a local user.
///
/// Invariant: while `plan_id` refers to the free plan,
/// `provider_subscription_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingUser {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub plan_id: PlanId,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub subscription_status: LocalStatus,
    pub subscription_start_date: Option<Timestamp>,
    pub subscription_end_date: Option<Timestamp>,
    pub subscription_canceled_at: Option<Timestamp>,
    /// Optimistic concurrency token, bumped on every persisted write.
    pub version: i64,
}

/// Provider-side subscription state carried by an event or API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
}

/// What a transition did to the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Changed,
    Unchanged,
}

impl TransitionOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, TransitionOutcome::Changed)
    }
}

impl BillingUser {
    /// Creates a user on the given plan with no provider linkage.
    pub fn new(id: UserId, email: impl Into<String>, plan_id: PlanId) -> Self {
        Self {
            id,
            email: email.into(),
            name: None,
            plan_id,
            provider_customer_id: None,
            provider_subscription_id: None,
            subscription_status: LocalStatus::Active,
            subscription_start_date: None,
            subscription_end_date: None,
            subscription_canceled_at: None,
            version: 0,
        }
    }

    /// Returns true if the free-plan invariant holds against `plan`.
    ///
    /// `plan` must be the user's current plan.
    pub fn satisfies_free_plan_invariant(&self, plan: &Plan) -> bool {
        !(plan.is_free && self.provider_subscription_id.is_some())
    }

    /// Applies a completed checkout for a paid plan.
    ///
    /// Sets the plan and records the provider ids. An existing customer id
    /// is never overwritten. Status comes from the fetched subscription when
    /// there is one, so a cancellation that landed upstream first is kept;
    /// without it the subscription is assumed active.
    pub fn apply_checkout(
        &mut self,
        plan: &Plan,
        customer_id: Option<&str>,
        subscription: Option<&SubscriptionSnapshot>,
        subscription_id: Option<&str>,
    ) -> Result<TransitionOutcome, BillingError> {
        if plan.is_free {
            return Err(BillingError::InconsistentState(format!(
                "checkout completed for free plan {}",
                plan.id
            )));
        }

        let before = self.clone();
        self.plan_id = plan.id.clone();
        match subscription {
            Some(snapshot) => {
                self.subscription_status = map_provider_status(&snapshot.status);
                self.subscription_canceled_at = match self.subscription_status {
                    LocalStatus::Canceled => {
                        Some(snapshot.canceled_at.unwrap_or_else(Timestamp::now))
                    }
                    LocalStatus::Expired => snapshot.canceled_at,
                    LocalStatus::Active => None,
                };
            }
            None => {
                self.subscription_status = LocalStatus::Active;
                self.subscription_canceled_at = None;
            }
        }

        if self.provider_customer_id.is_none() {
            self.provider_customer_id = customer_id.map(str::to_string);
        }
        if let Some(sub_id) = subscription_id {
            if self.provider_subscription_id.as_deref() != Some(sub_id) {
                // Periods of the previous subscription do not apply.
                self.subscription_start_date = None;
                self.subscription_end_date = None;
            }
            self.provider_subscription_id = Some(sub_id.to_string());
        }
        if let Some(snapshot) = subscription {
            self.apply_period(snapshot);
        }

        Ok(self.outcome_since(&before))
    }

    /// Applies a `customer.subscription.created/updated` snapshot.
    ///
    /// Status is last-write-wins with two guards: a canceled or expired
    /// subscription is never revived under the same id, and a non-active
    /// update for a subscription other than the one on record is dropped.
    /// Period fields are only taken when the incoming period end is not
    /// older than the stored one.
    pub fn apply_subscription_update(
        &mut self,
        snapshot: &SubscriptionSnapshot,
        current_plan: &Plan,
        target_plan: Option<&Plan>,
    ) -> Result<TransitionOutcome, BillingError> {
        let mapped = map_provider_status(&snapshot.status);
        let same_subscription =
            self.provider_subscription_id.as_deref() == Some(snapshot.subscription_id.as_str());

        if self.provider_subscription_id.is_some() && !same_subscription && mapped != LocalStatus::Active {
            tracing::info!(
                user_id = %self.id,
                subscription_id = %snapshot.subscription_id,
                "Dropping update for a subscription that is no longer on record"
            );
            return Ok(TransitionOutcome::Unchanged);
        }

        if same_subscription && self.subscription_status.is_terminal() && !mapped.is_terminal() {
            tracing::warn!(
                user_id = %self.id,
                subscription_id = %snapshot.subscription_id,
                status = %snapshot.status,
                "Refusing to revive a terminated subscription"
            );
            return Ok(TransitionOutcome::Unchanged);
        }

        let effective_plan = match target_plan {
            Some(plan) => plan,
            None => current_plan,
        };
        if effective_plan.is_free {
            return Err(BillingError::InconsistentState(format!(
                "subscription {} cannot be attached to free plan {}",
                snapshot.subscription_id, effective_plan.id
            )));
        }

        let before = self.clone();
        if !same_subscription {
            self.subscription_start_date = None;
            self.subscription_end_date = None;
        }
        self.plan_id = effective_plan.id.clone();
        self.provider_subscription_id = Some(snapshot.subscription_id.clone());
        self.subscription_status = mapped;
        match mapped {
            LocalStatus::Canceled => {
                if self.subscription_canceled_at.is_none() {
                    self.subscription_canceled_at =
                        Some(snapshot.canceled_at.unwrap_or_else(Timestamp::now));
                }
            }
            LocalStatus::Active => self.subscription_canceled_at = None,
            LocalStatus::Expired => {}
        }
        if self.provider_customer_id.is_none() {
            self.provider_customer_id = snapshot.customer_id.clone();
        }
        self.apply_period(snapshot);

        Ok(self.outcome_since(&before))
    }

    /// Applies `customer.subscription.deleted`. The plan is kept.
    pub fn apply_subscription_deleted(
        &mut self,
        subscription_id: &str,
        canceled_at: Option<Timestamp>,
    ) -> TransitionOutcome {
        match self.provider_subscription_id.as_deref() {
            Some(current) if current != subscription_id => {
                tracing::info!(
                    user_id = %self.id,
                    subscription_id,
                    current_subscription_id = current,
                    "Ignoring deletion of a subscription that is no longer on record"
                );
                return TransitionOutcome::Unchanged;
            }
            _ => {}
        }

        let before = self.clone();
        self.subscription_status = LocalStatus::Canceled;
        if self.subscription_canceled_at.is_none() {
            self.subscription_canceled_at = Some(canceled_at.unwrap_or_else(Timestamp::now));
        }
        self.outcome_since(&before)
    }

    /// Records a subscription created through provisioning.
    pub fn attach_subscription(&mut self, snapshot: &SubscriptionSnapshot) {
        self.provider_subscription_id = Some(snapshot.subscription_id.clone());
        self.subscription_status = map_provider_status(&snapshot.status);
        self.subscription_start_date = snapshot.current_period_start;
        self.subscription_end_date = snapshot.current_period_end;
        self.subscription_canceled_at = None;
    }

    /// Moves the user to another plan, detaching any provider subscription.
    ///
    /// The caller is responsible for canceling the detached subscription
    /// upstream before persisting.
    pub fn switch_plan(&mut self, plan: &Plan) -> TransitionOutcome {
        let before = self.clone();
        self.plan_id = plan.id.clone();
        if self.provider_subscription_id.take().is_some() {
            self.subscription_canceled_at = Some(Timestamp::now());
        }
        self.subscription_status = LocalStatus::Active;
        self.subscription_start_date = None;
        self.subscription_end_date = None;
        self.outcome_since(&before)
    }

    fn apply_period(&mut self, snapshot: &SubscriptionSnapshot) {
        if let (Some(incoming), Some(stored)) =
            (snapshot.current_period_end, self.subscription_end_date)
        {
            if incoming.is_before(&stored) {
                tracing::debug!(
                    user_id = %self.id,
                    subscription_id = %snapshot.subscription_id,
                    "Skipping stale billing period"
                );
                return;
            }
        }
        if snapshot.current_period_start.is_some() {
            self.subscription_start_date = snapshot.current_period_start;
        }
        if snapshot.current_period_end.is_some() {
            self.subscription_end_date = snapshot.current_period_end;
        }
    }

    fn outcome_since(&self, before: &BillingUser) -> TransitionOutcome {
        if self == before {
            TransitionOutcome::Unchanged
        } else {
            TransitionOutcome::Changed
        }
    }
}
