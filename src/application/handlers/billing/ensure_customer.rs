//! EnsureCustomerHandler - Provisions the provider customer and subscription for a user.

use std::sync::Arc;

use crate::domain::billing::{
    AuditAction, AuditLogEntry, AuditObjectType, BillingError, BillingUser, Plan,
    ProvisionReport, StepOutcome,
};
use crate::domain::foundation::UserId;
use crate::ports::{
    AuditLog, ConditionalWrite, CreateCustomerRequest, CreateSubscriptionRequest, PlanRepository,
    ProviderGateway, TransactionRepository, UserRepository,
};

/// Command to make sure a user has every provider object their plan needs.
#[derive(Debug, Clone)]
pub struct EnsureCustomerCommand {
    pub user_id: UserId,
    pub actor_id: String,
}

/// Handler for `ensure_customer_and_subscription`.
///
/// Steps:
/// 1. Link a provider customer if none is stored (search by email first)
/// 2. Fill in `user_id` on transactions recorded before the customer resolved
/// 3. For a paid plan with a price and no subscription, create one
///
/// Safe to run repeatedly; a fully provisioned user is a no-op.
pub struct EnsureCustomerHandler {
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn PlanRepository>,
    transactions: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditLog>,
}

impl EnsureCustomerHandler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn PlanRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn ProviderGateway>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            users,
            plans,
            transactions,
            gateway,
            audit,
        }
    }

    pub async fn handle(&self, cmd: EnsureCustomerCommand) -> Result<ProvisionReport, BillingError> {
        // 1. Load user and plan
        let user = self
            .users
            .find_by_id(&cmd.user_id)
            .await?
            .ok_or_else(|| BillingError::user_not_found(&cmd.user_id))?;
        let plan = self.plans.find_by_id(&user.plan_id).await?.ok_or_else(|| {
            BillingError::InconsistentState(format!(
                "user {} refers to missing plan {}",
                user.id, user.plan_id
            ))
        })?;

        // 2. Customer
        let (customer, found_existing) = self.ensure_customer(&user).await?;
        let customer_id = match customer.provider_id() {
            Some(id) => id.to_string(),
            None => {
                return Err(BillingError::InconsistentState(format!(
                    "user {} has no customer after provisioning",
                    user.id
                )))
            }
        };

        // 3. Backfill transactions recorded before the customer was linked
        let backfilled = match self
            .transactions
            .backfill_user_id(&customer_id, &user.id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    user_id = %user.id,
                    customer_id = %customer_id,
                    error = %e,
                    "Transaction backfill failed; next run will retry"
                );
                0
            }
        };

        // 4. Subscription
        let subscription = self.ensure_subscription(&user, &plan, &customer_id).await;

        let report = ProvisionReport {
            user_id: user.id.clone(),
            customer,
            subscription,
            backfilled_transactions: backfilled,
        };

        // 5. Audit
        let entry = AuditLogEntry::builder(
            AuditAction::CustomerProvisioned,
            AuditObjectType::User,
            &user.id,
        )
        .actor(cmd.actor_id)
        .detail("plan_id", &plan.id)
        .detail("created", report.created())
        .detail("already_present", report.already_present())
        .detail("customer_id", report.customer.provider_id())
        .detail("customer_found_by_search", found_existing)
        .detail("subscription_id", report.subscription.provider_id())
        .detail("backfilled_transactions", backfilled)
        .detail("summary", report.summary())
        .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            user_id = %user.id,
            plan_id = %plan.id,
            summary = %report.summary(),
            "Provisioning finished"
        );

        Ok(report)
    }

    /// Returns the customer step and whether an existing provider customer
    /// was adopted rather than created.
    async fn ensure_customer(&self, user: &BillingUser) -> Result<(StepOutcome, bool), BillingError> {
        if let Some(id) = &user.provider_customer_id {
            return Ok((StepOutcome::already_present(id), false));
        }

        let resolution = self
            .gateway
            .find_or_create_customer(CreateCustomerRequest::new(
                user.id.clone(),
                user.email.clone(),
                user.name.clone(),
            ))
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user.id, error = %e, "Customer resolution failed");
                BillingError::from(e)
            })?;
        let resolved = resolution.customer().id.clone();

        match self
            .users
            .set_provider_customer_id_if_absent(&user.id, &resolved)
            .await?
        {
            ConditionalWrite::Applied => {
                tracing::info!(
                    user_id = %user.id,
                    customer_id = %resolved,
                    created = resolution.was_created(),
                    "Provider customer linked"
                );
                Ok((StepOutcome::created(resolved), !resolution.was_created()))
            }
            ConditionalWrite::AlreadySet(existing) => {
                if existing != resolved {
                    tracing::warn!(
                        user_id = %user.id,
                        stored_customer_id = %existing,
                        resolved_customer_id = %resolved,
                        "Concurrent provisioning linked a different customer"
                    );
                }
                Ok((StepOutcome::already_present(existing), false))
            }
        }
    }

    async fn ensure_subscription(
        &self,
        user: &BillingUser,
        plan: &Plan,
        customer_id: &str,
    ) -> StepOutcome {
        if plan.is_free {
            if let Some(sub) = &user.provider_subscription_id {
                tracing::error!(
                    user_id = %user.id,
                    subscription_id = %sub,
                    "User on free plan still has a provider subscription"
                );
                return StepOutcome::failed(
                    format!("free-plan user still linked to subscription {}", sub),
                    false,
                );
            }
            return StepOutcome::not_applicable("free plan");
        }
        if let Some(sub) = &user.provider_subscription_id {
            return StepOutcome::already_present(sub);
        }
        let price_id = match &plan.provider_price_id {
            Some(id) => id.clone(),
            None => {
                return StepOutcome::failed(
                    format!("plan {} not synced (missing provider price id)", plan.id),
                    false,
                )
            }
        };

        let generation = user
            .subscription_canceled_at
            .map(|t| t.as_unix_secs())
            .unwrap_or(0);
        let request =
            CreateSubscriptionRequest::new(customer_id, price_id, user.id.clone(), plan.id.clone())
                .with_generation(generation);

        let created = match self.gateway.create_subscription(request).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Subscription creation failed");
                return StepOutcome::failed(e.to_string(), e.is_retryable());
            }
        };

        match self
            .users
            .attach_subscription_if_absent(&user.id, &plan.id, &created.snapshot())
            .await
        {
            Ok(ConditionalWrite::Applied) => {
                tracing::info!(
                    user_id = %user.id,
                    subscription_id = %created.id,
                    status = %created.status,
                    "Provider subscription linked"
                );
                StepOutcome::created(created.id)
            }
            Ok(ConditionalWrite::AlreadySet(existing)) => {
                if existing != created.id {
                    self.cancel_orphan(user, &created.id).await;
                }
                StepOutcome::already_present(existing)
            }
            Err(e) if e.is_concurrency_conflict() => {
                self.cancel_orphan(user, &created.id).await;
                StepOutcome::failed("user changed plan during provisioning", true)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user.id,
                    subscription_id = %created.id,
                    error = %e,
                    "Failed to persist subscription; a retry reuses the provider object"
                );
                StepOutcome::failed(e.to_string(), true)
            }
        }
    }

    async fn cancel_orphan(&self, user: &BillingUser, subscription_id: &str) {
        tracing::warn!(
            user_id = %user.id,
            subscription_id,
            "Canceling subscription that lost the race to be linked"
        );
        if let Err(e) = self.gateway.cancel_subscription(subscription_id).await {
            tracing::error!(
                user_id = %user.id,
                subscription_id,
                error = %e,
                "Failed to cancel orphaned subscription"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::Harness;
    use crate::domain::billing::fixtures::{free_plan, pro_plan, user_on};
    use crate::domain::billing::{LocalStatus, Transaction};
    use crate::ports::{ProviderCustomer, ProviderError};

    fn ensure_cmd(user_id: &str) -> EnsureCustomerCommand {
        EnsureCustomerCommand {
            user_id: UserId::new(user_id).unwrap(),
            actor_id: "admin-1".to_string(),
        }
    }

    #[tokio::test]
    async fn free_user_gets_customer_only() {
        let h = Harness::new();
        let free = free_plan();
        h.seed_plan(&free).await;
        h.seed_user(&user_on("u2", &free)).await;

        let report = h.ensure_handler().handle(ensure_cmd("u2")).await.unwrap();

        assert_eq!(report.summary(), "customer created, subscription not applicable");
        let user = h.user("u2").await;
        assert!(user.provider_customer_id.is_some());
        assert!(user.provider_subscription_id.is_none());
        assert_eq!(h.gateway.subscription_count(), 0);
    }

    #[tokio::test]
    async fn paid_user_gets_customer_and_subscription() {
        let h = Harness::new();
        let pro = h.seed_synced_pro_plan().await;
        h.seed_user(&user_on("u1", &pro)).await;

        let report = h.ensure_handler().handle(ensure_cmd("u1")).await.unwrap();

        assert!(report.customer.is_created());
        assert!(report.subscription.is_created());
        let user = h.user("u1").await;
        assert_eq!(user.provider_subscription_id.as_deref(), report.subscription.provider_id());
        assert_eq!(user.subscription_status, LocalStatus::Active);
        assert!(user.subscription_end_date.is_some());
    }

    #[tokio::test]
    async fn provisioned_user_is_a_no_op() {
        let h = Harness::new();
        let pro = h.seed_synced_pro_plan().await;
        h.seed_user(&user_on("u1", &pro)).await;
        h.ensure_handler().handle(ensure_cmd("u1")).await.unwrap();

        let report = h.ensure_handler().handle(ensure_cmd("u1")).await.unwrap();

        assert!(report.customer.is_already_present());
        assert!(report.subscription.is_already_present());
        assert_eq!(h.gateway.call_count("create_customer"), 1);
        assert_eq!(h.gateway.call_count("create_subscription"), 1);
    }

    #[tokio::test]
    async fn existing_provider_customer_is_adopted() {
        let h = Harness::new();
        let free = free_plan();
        h.seed_plan(&free).await;
        h.seed_user(&user_on("u3", &free)).await;
        h.gateway.insert_customer(ProviderCustomer {
            id: "cus_existing".into(),
            email: Some("u3@example.com".into()),
        });

        let report = h.ensure_handler().handle(ensure_cmd("u3")).await.unwrap();

        assert_eq!(report.customer.provider_id(), Some("cus_existing"));
        assert!(!h.gateway.was_called("create_customer"));
        assert_eq!(
            h.user("u3").await.provider_customer_id.as_deref(),
            Some("cus_existing")
        );
    }

    #[tokio::test]
    async fn unsynced_paid_plan_reports_failed_subscription() {
        let h = Harness::new();
        let pro = pro_plan();
        h.seed_plan(&pro).await;
        h.seed_user(&user_on("u1", &pro)).await;

        let report = h.ensure_handler().handle(ensure_cmd("u1")).await.unwrap();

        assert!(report.customer.is_created());
        assert!(matches!(
            report.subscription,
            StepOutcome::Failed { retryable: false, .. }
        ));
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn subscription_failure_keeps_customer() {
        let h = Harness::new();
        let pro = h.seed_synced_pro_plan().await;
        h.seed_user(&user_on("u1", &pro)).await;
        h.gateway
            .fail_next("create_subscription", ProviderError::unavailable("timeout"));

        let report = h.ensure_handler().handle(ensure_cmd("u1")).await.unwrap();

        assert!(report.customer.is_created());
        assert!(matches!(
            report.subscription,
            StepOutcome::Failed { retryable: true, .. }
        ));
        assert!(h.user("u1").await.provider_customer_id.is_some());
    }

    #[tokio::test]
    async fn customer_failure_is_an_error() {
        let h = Harness::new();
        let free = free_plan();
        h.seed_plan(&free).await;
        h.seed_user(&user_on("u2", &free)).await;
        h.gateway.set_method_error(
            "find_customer_by_email",
            ProviderError::from_status(401, "Invalid API key"),
        );

        let err = h.ensure_handler().handle(ensure_cmd("u2")).await.unwrap_err();

        assert!(matches!(err, BillingError::ProviderRejected(_)));
        assert!(h.user("u2").await.provider_customer_id.is_none());
    }

    #[tokio::test]
    async fn transactions_are_backfilled_once_customer_resolves() {
        let h = Harness::new();
        let free = free_plan();
        h.seed_plan(&free).await;
        h.seed_user(&user_on("u4", &free)).await;
        h.gateway.insert_customer(ProviderCustomer {
            id: "cus_early".into(),
            email: Some("u4@example.com".into()),
        });
        h.record(&Transaction::new("in_1", "cus_early", 999, "usd", "paid")).await;

        let report = h.ensure_handler().handle(ensure_cmd("u4")).await.unwrap();

        assert_eq!(report.backfilled_transactions, 1);
        let tx = h.transaction("in_1").await.unwrap();
        assert_eq!(tx.user_id, Some(UserId::new("u4").unwrap()));
    }

    #[tokio::test]
    async fn concurrent_runs_link_one_customer_and_one_subscription() {
        let h = Harness::new();
        let pro = h.seed_synced_pro_plan().await;
        h.seed_user(&user_on("u1", &pro)).await;
        let handler = Arc::new(h.ensure_handler());

        let runs = (0..6).map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move { handler.handle(ensure_cmd("u1")).await })
        });
        for result in futures::future::join_all(runs).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(h.gateway.customer_count(), 1);
        assert_eq!(h.gateway.subscription_count(), 1);
        assert!(!h.gateway.was_called("cancel_subscription"));
    }

    #[tokio::test]
    async fn provisioning_is_audited_with_created_fields() {
        let h = Harness::new();
        let free = free_plan();
        h.seed_plan(&free).await;
        h.seed_user(&user_on("u2", &free)).await;

        h.ensure_handler().handle(ensure_cmd("u2")).await.unwrap();

        let entries = h
            .audit
            .entries_with_action(AuditAction::CustomerProvisioned)
            .await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].details["created"], serde_json::json!(["customer"]));
        assert_eq!(entries[0].details["already_present"], serde_json::json!([]));
    }
}
