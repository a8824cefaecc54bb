//! In-memory plan catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::{BillingInterval, Plan};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId};
use crate::ports::{ConditionalWrite, PlanRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<PlanId, Plan>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(message: String) -> DomainError {
    DomainError::new(ErrorCode::Conflict, message)
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), DomainError> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(conflict(format!("Plan {} already exists", plan.id)));
        }
        if plans.values().any(|p| p.level == plan.level) {
            return Err(conflict(format!("Plan level {} is taken", plan.level)));
        }
        if plan.is_free && plans.values().any(|p| p.is_free) {
            return Err(conflict("The catalog already has a free plan".to_string()));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.read().await.get(id).cloned())
    }

    async fn find_by_provider_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, DomainError> {
        let plans = self.plans.read().await;
        Ok(plans
            .values()
            .find(|p| p.provider_product_id.as_deref() == Some(product_id))
            .cloned())
    }

    async fn set_provider_product_id_if_absent(
        &self,
        id: &PlanId,
        product_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| DomainError::plan_not_found(id))?;
        match &plan.provider_product_id {
            Some(existing) => Ok(ConditionalWrite::AlreadySet(existing.clone())),
            None => {
                plan.provider_product_id = Some(product_id.to_string());
                Ok(ConditionalWrite::Applied)
            }
        }
    }

    async fn set_provider_price_id_if_absent(
        &self,
        id: &PlanId,
        price_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| DomainError::plan_not_found(id))?;
        match &plan.provider_price_id {
            Some(existing) => Ok(ConditionalWrite::AlreadySet(existing.clone())),
            None => {
                plan.provider_price_id = Some(price_id.to_string());
                Ok(ConditionalWrite::Applied)
            }
        }
    }

    async fn replace_provider_price_id(
        &self,
        id: &PlanId,
        expected: &str,
        price_id: &str,
    ) -> Result<bool, DomainError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| DomainError::plan_not_found(id))?;
        if plan.provider_price_id.as_deref() != Some(expected) {
            return Ok(false);
        }
        plan.provider_price_id = Some(price_id.to_string());
        Ok(true)
    }

    async fn update_terms(
        &self,
        id: &PlanId,
        price: i64,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<(), DomainError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| DomainError::plan_not_found(id))?;
        plan.price = price;
        plan.currency = currency.to_string();
        plan.interval = interval;
        Ok(())
    }
}
