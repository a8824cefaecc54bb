//! AssignPlanHandler - Moves a user to another plan and reconciles provider state.

use std::sync::Arc;

use crate::domain::billing::{
    AuditAction, AuditLogEntry, AuditObjectType, BillingError, BillingUser, Plan,
    ProvisionReport, StepOutcome,
};
use crate::domain::foundation::{PlanId, UserId};
use crate::ports::{AuditLog, PlanRepository, ProviderGateway, UserRepository};

use super::ensure_customer::{EnsureCustomerCommand, EnsureCustomerHandler};
use super::sync_plan::{SyncPlanCommand, SyncPlanHandler};
use super::validate_plan::{ValidatePlanHandler, ValidatePlanQuery};

const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Command to assign a plan to a user.
#[derive(Debug, Clone)]
pub struct AssignPlanCommand {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub actor_id: String,
}

/// Result of a plan assignment.
#[derive(Debug, Clone)]
pub struct AssignPlanResult {
    pub user: BillingUser,
    pub previous_plan_id: PlanId,
    /// Subscriptions canceled upstream because they belonged to the old plan.
    pub canceled_subscriptions: Vec<String>,
    /// Provisioning run for paid plans.
    pub provisioning: Option<ProvisionReport>,
}

/// Handler for administrator plan assignment.
///
/// Moving to a free plan cancels the provider subscription before the local
/// record drops it, so the free-plan invariant holds. Moving to a paid plan
/// first makes sure the plan's catalog entry is synced and matches the
/// provider, then provisions the user.
pub struct AssignPlanHandler {
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditLog>,
    sync: Arc<SyncPlanHandler>,
    validate: Arc<ValidatePlanHandler>,
    ensure: Arc<EnsureCustomerHandler>,
}

impl AssignPlanHandler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn PlanRepository>,
        gateway: Arc<dyn ProviderGateway>,
        audit: Arc<dyn AuditLog>,
        sync: Arc<SyncPlanHandler>,
        validate: Arc<ValidatePlanHandler>,
        ensure: Arc<EnsureCustomerHandler>,
    ) -> Self {
        Self {
            users,
            plans,
            gateway,
            audit,
            sync,
            validate,
            ensure,
        }
    }

    pub async fn handle(&self, cmd: AssignPlanCommand) -> Result<AssignPlanResult, BillingError> {
        // 1. Load user and target plan
        let user = self.load_user(&cmd.user_id).await?;
        let target = self
            .plans
            .find_by_id(&cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(&cmd.plan_id))?;
        let previous_plan_id = user.plan_id.clone();

        // 2. A paid target must be synced and match the provider
        if !target.is_free {
            self.prepare_paid_plan(&target, &cmd.actor_id).await?;
        }

        // 3. Switch locally, canceling whatever subscription the user holds
        let mut canceled = Vec::new();
        let user = if user.plan_id == target.id {
            tracing::debug!(user_id = %user.id, plan_id = %target.id, "User already on plan");
            user
        } else {
            self.switch_plan(user, &target, &mut canceled).await?
        };

        // 4. Audit
        let entry = AuditLogEntry::builder(AuditAction::PlanAssigned, AuditObjectType::User, &user.id)
            .actor(cmd.actor_id.clone())
            .detail("from_plan_id", &previous_plan_id)
            .detail("to_plan_id", &target.id)
            .detail("canceled_subscriptions", &canceled)
            .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            user_id = %user.id,
            from_plan_id = %previous_plan_id,
            to_plan_id = %target.id,
            "Plan assigned"
        );

        // 5. Provision the paid plan
        let provisioning = if target.is_free {
            None
        } else {
            Some(
                self.ensure
                    .handle(EnsureCustomerCommand {
                        user_id: user.id.clone(),
                        actor_id: cmd.actor_id,
                    })
                    .await?,
            )
        };

        let user = self.load_user(&user.id).await?;
        Ok(AssignPlanResult {
            user,
            previous_plan_id,
            canceled_subscriptions: canceled,
            provisioning,
        })
    }

    async fn load_user(&self, id: &UserId) -> Result<BillingUser, BillingError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| BillingError::user_not_found(id))
    }

    async fn prepare_paid_plan(&self, plan: &Plan, actor_id: &str) -> Result<(), BillingError> {
        if plan.provider_price_id.is_none() || plan.provider_product_id.is_none() {
            let report = self
                .sync
                .handle(SyncPlanCommand {
                    plan_id: plan.id.clone(),
                    actor_id: actor_id.to_string(),
                })
                .await?;
            if let StepOutcome::Failed { reason, retryable } = &report.price {
                let message = format!("plan {} price sync failed: {}", plan.id, reason);
                return Err(if *retryable {
                    BillingError::ProviderUnavailable(message)
                } else {
                    BillingError::ProviderRejected(message)
                });
            }
        }

        self.validate
            .handle(ValidatePlanQuery {
                plan_id: plan.id.clone(),
            })
            .await?
            .ensure_valid()
    }

    async fn switch_plan(
        &self,
        mut user: BillingUser,
        target: &Plan,
        canceled: &mut Vec<String>,
    ) -> Result<BillingUser, BillingError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            if let Some(sub) = user.provider_subscription_id.clone() {
                if !canceled.contains(&sub) {
                    self.cancel_upstream(&user.id, &sub).await?;
                    canceled.push(sub);
                }
            }

            user.switch_plan(target);
            match self.users.update(&user).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_concurrency_conflict() && attempt < MAX_UPDATE_ATTEMPTS => {
                    tracing::debug!(user_id = %user.id, attempt, "User changed concurrently, reloading");
                    user = self.load_user(&user.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BillingError::ConcurrentModification(format!(
            "user {} kept changing during plan assignment",
            user.id
        )))
    }

    async fn cancel_upstream(&self, user_id: &UserId, subscription_id: &str) -> Result<(), BillingError> {
        match self.gateway.cancel_subscription(subscription_id).await {
            Ok(sub) => {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id,
                    status = %sub.status,
                    "Provider subscription canceled"
                );
                Ok(())
            }
            Err(e) if e.status == Some(404) => {
                tracing::warn!(user_id = %user_id, subscription_id, "Subscription already gone upstream");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
