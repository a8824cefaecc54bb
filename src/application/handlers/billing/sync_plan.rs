//! SyncPlanHandler - Creates missing provider catalog objects for a plan.

use std::sync::Arc;

use crate::domain::billing::{
    AuditAction, AuditLogEntry, AuditObjectType, BillingError, Plan, StepOutcome, SyncReport,
};
use crate::domain::foundation::PlanId;
use crate::ports::{
    AuditLog, ConditionalWrite, CreatePriceRequest, CreateProductRequest, PlanRepository,
    ProviderGateway,
};

/// Command to sync one plan with the provider catalog.
#[derive(Debug, Clone)]
pub struct SyncPlanCommand {
    pub plan_id: PlanId,
    pub actor_id: String,
}

/// Handler for plan catalog sync.
///
/// Each provider id is persisted as soon as it exists, and only into an
/// empty slot, so repeated or concurrent runs converge on one product and
/// one price. Free plans never get provider objects.
pub struct SyncPlanHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditLog>,
}

impl SyncPlanHandler {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        gateway: Arc<dyn ProviderGateway>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            plans,
            gateway,
            audit,
        }
    }

    /// # Errors
    ///
    /// - `NotFound` if the plan does not exist
    /// - `ProviderUnavailable` / `ProviderRejected` if the product cannot be created
    /// - `Database` if a provider id cannot be persisted
    ///
    /// A failed price step after a successful product step is not an error;
    /// it is reported in the returned `SyncReport`.
    pub async fn handle(&self, cmd: SyncPlanCommand) -> Result<SyncReport, BillingError> {
        // 1. Load the plan
        let plan = self
            .plans
            .find_by_id(&cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(&cmd.plan_id))?;

        if plan.is_free {
            tracing::debug!(plan_id = %plan.id, "Free plan has no provider objects");
            return Ok(SyncReport::not_applicable(plan.id));
        }

        // 2. Product
        let product = self.ensure_product(&plan).await?;
        let product_id = match product.provider_id() {
            Some(id) => id.to_string(),
            None => {
                return Err(BillingError::InconsistentState(format!(
                    "plan {} has no product after sync",
                    plan.id
                )))
            }
        };

        // 3. Price
        let price = self.ensure_price(&plan, &product_id).await?;

        let report = SyncReport {
            plan_id: plan.id.clone(),
            product,
            price,
        };

        // 4. Audit
        let entry = AuditLogEntry::builder(AuditAction::PlanSynced, AuditObjectType::Plan, &plan.id)
            .actor(cmd.actor_id)
            .detail("created", report.created())
            .detail("already_present", report.already_present())
            .detail("product_id", report.product.provider_id())
            .detail("price_id", report.price.provider_id())
            .detail("summary", report.summary())
            .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            plan_id = %plan.id,
            summary = %report.summary(),
            success = report.is_success(),
            "Plan sync finished"
        );

        Ok(report)
    }

    async fn ensure_product(&self, plan: &Plan) -> Result<StepOutcome, BillingError> {
        if let Some(id) = &plan.provider_product_id {
            return Ok(StepOutcome::already_present(id));
        }

        let created = self
            .gateway
            .create_product(CreateProductRequest {
                plan_id: plan.id.clone(),
                name: plan.name.clone(),
                idempotency_key: plan.product_idempotency_key(),
            })
            .await
            .map_err(|e| {
                tracing::warn!(plan_id = %plan.id, error = %e, "Provider product creation failed");
                BillingError::from(e)
            })?;

        match self
            .plans
            .set_provider_product_id_if_absent(&plan.id, &created.id)
            .await?
        {
            ConditionalWrite::Applied => {
                tracing::info!(plan_id = %plan.id, product_id = %created.id, "Provider product linked");
                Ok(StepOutcome::created(created.id))
            }
            ConditionalWrite::AlreadySet(existing) => {
                if existing != created.id {
                    tracing::warn!(
                        plan_id = %plan.id,
                        stored_product_id = %existing,
                        orphan_product_id = %created.id,
                        "Concurrent sync linked a different product; new product left unlinked"
                    );
                }
                Ok(StepOutcome::already_present(existing))
            }
        }
    }

    async fn ensure_price(&self, plan: &Plan, product_id: &str) -> Result<StepOutcome, BillingError> {
        if let Some(id) = &plan.provider_price_id {
            return Ok(StepOutcome::already_present(id));
        }

        let created = match self
            .gateway
            .create_price(CreatePriceRequest {
                product_id: product_id.to_string(),
                plan_id: plan.id.clone(),
                unit_amount: plan.price,
                currency: plan.currency.clone(),
                interval: plan.interval,
                idempotency_key: plan.price_idempotency_key(),
            })
            .await
        {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    plan_id = %plan.id,
                    product_id,
                    error = %e,
                    "Provider price creation failed"
                );
                return Ok(StepOutcome::failed(e.to_string(), e.is_retryable()));
            }
        };

        match self
            .plans
            .set_provider_price_id_if_absent(&plan.id, &created.id)
            .await?
        {
            ConditionalWrite::Applied => {
                tracing::info!(plan_id = %plan.id, price_id = %created.id, "Provider price linked");
                Ok(StepOutcome::created(created.id))
            }
            ConditionalWrite::AlreadySet(existing) => Ok(StepOutcome::already_present(existing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::Harness;
    use crate::domain::billing::fixtures::{free_plan, pro_plan};
    use crate::ports::ProviderError;

    fn sync_cmd(plan_id: &str) -> SyncPlanCommand {
        SyncPlanCommand {
            plan_id: PlanId::new(plan_id).unwrap(),
            actor_id: "admin-1".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_product_and_price_for_unsynced_plan() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;

        let report = h.sync_handler().handle(sync_cmd("pro")).await.unwrap();

        assert!(report.product.is_created());
        assert!(report.price.is_created());
        let stored = h.plan("pro").await;
        assert_eq!(stored.provider_product_id.as_deref(), report.product.provider_id());
        assert_eq!(stored.provider_price_id.as_deref(), report.price.provider_id());

        let price = h.gateway.price(report.price.provider_id().unwrap()).unwrap();
        assert_eq!(price.unit_amount, Some(999));
        assert_eq!(price.interval.as_deref(), Some("month"));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;
        h.sync_handler().handle(sync_cmd("pro")).await.unwrap();

        let report = h.sync_handler().handle(sync_cmd("pro")).await.unwrap();

        assert!(report.product.is_already_present());
        assert!(report.price.is_already_present());
        assert_eq!(h.gateway.call_count("create_product"), 1);
        assert_eq!(h.gateway.call_count("create_price"), 1);
    }

    #[tokio::test]
    async fn free_plan_is_not_applicable() {
        let h = Harness::new();
        h.seed_plan(&free_plan()).await;

        let report = h.sync_handler().handle(sync_cmd("free")).await.unwrap();

        assert_eq!(report, SyncReport::not_applicable(PlanId::new("free").unwrap()));
        assert!(!h.gateway.was_called("create_product"));
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let h = Harness::new();

        let err = h.sync_handler().handle(sync_cmd("ghost")).await.unwrap_err();

        assert_eq!(err, BillingError::plan_not_found("ghost"));
    }

    #[tokio::test]
    async fn product_failure_surfaces_and_persists_nothing() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;
        h.gateway
            .fail_next("create_product", ProviderError::unavailable("timeout"));

        let err = h.sync_handler().handle(sync_cmd("pro")).await.unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
        assert!(h.plan("pro").await.provider_product_id.is_none());
    }

    #[tokio::test]
    async fn price_failure_keeps_product_and_reports_partial_success() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;
        h.gateway
            .fail_next("create_price", ProviderError::unavailable("timeout"));

        let report = h.sync_handler().handle(sync_cmd("pro")).await.unwrap();

        assert!(report.product.is_created());
        assert!(report.price.is_failed());
        assert!(!report.is_success());
        let stored = h.plan("pro").await;
        assert!(stored.provider_product_id.is_some());
        assert!(stored.provider_price_id.is_none());

        // A retry finishes the job on the same product.
        let retry = h.sync_handler().handle(sync_cmd("pro")).await.unwrap();
        assert!(retry.product.is_already_present());
        assert!(retry.price.is_created());
        assert_eq!(h.gateway.product_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_syncs_create_one_product_and_one_price() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;
        let handler = Arc::new(h.sync_handler());

        let runs = (0..8).map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move { handler.handle(sync_cmd("pro")).await })
        });
        let results = futures::future::join_all(runs).await;

        for result in results {
            assert!(result.unwrap().unwrap().is_success());
        }
        assert_eq!(h.gateway.product_count(), 1);
        assert_eq!(h.gateway.price_count(), 1);
    }

    #[tokio::test]
    async fn sync_is_audited() {
        let h = Harness::new();
        h.seed_plan(&pro_plan()).await;

        h.sync_handler().handle(sync_cmd("pro")).await.unwrap();

        let entries = h.audit.entries_with_action(AuditAction::PlanSynced).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor_id, "admin-1");
        assert_eq!(entries[0].object_id, "pro");
        assert_eq!(entries[0].details["created"], serde_json::json!(["product", "price"]));
    }
}
