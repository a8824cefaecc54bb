//! UpdatePlanPricingHandler - Changes a plan's terms and re-prices it at the provider.

use std::sync::Arc;

use crate::domain::billing::{
    normalize_currency, validate_price, AuditAction, AuditLogEntry, AuditObjectType,
    BillingError, BillingInterval, Plan, StepOutcome,
};
use crate::domain::foundation::PlanId;
use crate::ports::{AuditLog, CreatePriceRequest, PlanRepository, ProviderGateway};

/// Command to change a plan's price terms.
#[derive(Debug, Clone)]
pub struct UpdatePlanPricingCommand {
    pub plan_id: PlanId,
    /// Amount in minor currency units.
    pub price: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub actor_id: String,
}

/// Result of a pricing update.
#[derive(Debug, Clone)]
pub struct UpdatePlanPricingResult {
    pub plan: Plan,
    /// What happened to the provider price.
    pub price: StepOutcome,
}

/// Handler for plan pricing changes.
///
/// Provider prices are immutable, so new terms mint a new price on the same
/// product and the stored id is swapped with a compare-and-set on the old
/// value. Existing subscriptions keep the price they were created with.
pub struct UpdatePlanPricingHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn ProviderGateway>,
    audit: Arc<dyn AuditLog>,
}

impl UpdatePlanPricingHandler {
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

    pub async fn handle(
        &self,
        cmd: UpdatePlanPricingCommand,
    ) -> Result<UpdatePlanPricingResult, BillingError> {
        // 1. Validate input
        validate_price(cmd.price)?;
        let currency = normalize_currency(&cmd.currency)?;

        // 2. Load the plan
        let mut plan = self
            .plans
            .find_by_id(&cmd.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(&cmd.plan_id))?;
        if plan.is_free {
            return Err(BillingError::InconsistentState(format!(
                "free plan {} has no price",
                plan.id
            )));
        }

        let previous = (plan.price, plan.currency.clone(), plan.interval);
        let terms_changed = previous != (cmd.price, currency.clone(), cmd.interval);

        // 3. Update local terms
        if terms_changed {
            self.plans
                .update_terms(&plan.id, cmd.price, &currency, cmd.interval)
                .await?;
            plan.price = cmd.price;
            plan.currency = currency;
            plan.interval = cmd.interval;
        }

        // 4. Re-price at the provider
        let price = match (&plan.provider_product_id, plan.provider_price_id.clone()) {
            (Some(product_id), Some(old_price_id)) if terms_changed => {
                let product_id = product_id.clone();
                self.reprice(&mut plan, &product_id, &old_price_id).await?
            }
            (_, Some(price_id)) => StepOutcome::already_present(price_id),
            (_, None) => StepOutcome::not_applicable("plan not synced; sync creates the price"),
        };

        // 5. Audit
        let entry = AuditLogEntry::builder(
            AuditAction::PlanPricingUpdated,
            AuditObjectType::Plan,
            &plan.id,
        )
        .actor(cmd.actor_id)
        .detail("previous_price", previous.0)
        .detail("previous_currency", &previous.1)
        .detail("previous_interval", previous.2.as_str())
        .detail("price", plan.price)
        .detail("currency", &plan.currency)
        .detail("interval", plan.interval.as_str())
        .detail("price_id", price.provider_id())
        .detail("summary", price.describe("price"))
        .build();
        self.audit.append(&entry).await?;

        tracing::info!(
            plan_id = %plan.id,
            price = plan.price,
            currency = %plan.currency,
            interval = %plan.interval,
            outcome = %price.describe("price"),
            "Plan pricing updated"
        );

        Ok(UpdatePlanPricingResult { plan, price })
    }

    async fn reprice(
        &self,
        plan: &mut Plan,
        product_id: &str,
        old_price_id: &str,
    ) -> Result<StepOutcome, BillingError> {
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
                    "Provider price creation failed; plan keeps its old price id"
                );
                return Ok(StepOutcome::failed(e.to_string(), e.is_retryable()));
            }
        };

        if created.id == old_price_id {
            return Ok(StepOutcome::already_present(created.id));
        }

        if self
            .plans
            .replace_provider_price_id(&plan.id, old_price_id, &created.id)
            .await?
        {
            tracing::info!(
                plan_id = %plan.id,
                old_price_id,
                price_id = %created.id,
                "Provider price replaced"
            );
            plan.provider_price_id = Some(created.id.clone());
            Ok(StepOutcome::created(created.id))
        } else {
            let current = self
                .plans
                .find_by_id(&plan.id)
                .await?
                .and_then(|p| p.provider_price_id);
            tracing::warn!(
                plan_id = %plan.id,
                expected_price_id = old_price_id,
                current_price_id = ?current,
                "Price id changed concurrently; new price left unlinked"
            );
            plan.provider_price_id = current;
            Ok(StepOutcome::failed(
                "price id changed concurrently; retry to re-price",
                true,
            ))
        }
    }
}
