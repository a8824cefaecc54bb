//! ValidatePlanHandler - Read-only check of a plan against the provider catalog.

use std::sync::Arc;

use crate::domain::billing::{compare_catalog, BillingError, Discrepancy, ValidationReport};
use crate::domain::foundation::PlanId;
use crate::ports::{PlanRepository, ProviderGateway};

/// Query to validate one plan.
#[derive(Debug, Clone)]
pub struct ValidatePlanQuery {
    pub plan_id: PlanId,
}

/// Handler for the integration validator.
///
/// Never writes: drift is reported, repair is a separate admin decision.
pub struct ValidatePlanHandler {
    plans: Arc<dyn PlanRepository>,
    gateway: Arc<dyn ProviderGateway>,
}

impl ValidatePlanHandler {
    pub fn new(plans: Arc<dyn PlanRepository>, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self { plans, gateway }
    }

    /// # Errors
    ///
    /// - `NotFound` if the plan does not exist
    /// - `ProviderUnavailable` if the provider could not be reached; an
    ///   unreachable provider says nothing about drift
    pub async fn handle(&self, query: ValidatePlanQuery) -> Result<ValidationReport, BillingError> {
        let plan = self
            .plans
            .find_by_id(&query.plan_id)
            .await?
            .ok_or_else(|| BillingError::plan_not_found(&query.plan_id))?;

        if plan.is_free {
            return Ok(ValidationReport::valid(
                plan.id,
                "free plan has no provider objects",
            ));
        }

        let (product_id, price_id) = match (&plan.provider_product_id, &plan.provider_price_id) {
            (Some(product), Some(price)) => (product.clone(), price.clone()),
            (None, None) => return Ok(not_synced(plan.id, "provider product and price ids")),
            (None, Some(_)) => return Ok(not_synced(plan.id, "provider product id")),
            (Some(_), None) => return Ok(not_synced(plan.id, "provider price id")),
        };

        let product = self.gateway.get_product(&product_id).await?;
        let price = self.gateway.get_price(&price_id).await?;

        let discrepancies = match (product, price) {
            (Some(product), Some(price)) => compare_catalog(&plan, &product, &price),
            (product, price) => {
                let mut stale = Vec::new();
                if product.is_none() {
                    stale.push(Discrepancy::StaleProduct { product_id });
                }
                if price.is_none() {
                    stale.push(Discrepancy::StalePrice { price_id });
                }
                stale
            }
        };

        let report = ValidationReport::from_discrepancies(plan.id, discrepancies);
        if report.valid {
            tracing::debug!(plan_id = %report.plan_id, "Plan matches provider catalog");
        } else {
            tracing::warn!(plan_id = %report.plan_id, reason = %report.reason, "Plan drifted from provider catalog");
        }
        Ok(report)
    }
}

fn not_synced(plan_id: PlanId, missing: &str) -> ValidationReport {
    ValidationReport::from_discrepancies(
        plan_id,
        vec![Discrepancy::NotSynced {
            missing: missing.to_string(),
        }],
    )
}
