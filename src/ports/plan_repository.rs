//! Plan repository port.
//!
//! Plans are authored by administrators; the sync engine fills in provider
//! ids lazily. Provider ids are immutable once set, except the price id,
//! which is swapped with a compare-and-set when pricing changes.

use async_trait::async_trait;

use super::ConditionalWrite;
use crate::domain::billing::{BillingInterval, Plan};
use crate::domain::foundation::{DomainError, PlanId};

/// Repository port for the plan catalog.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Insert a catalog entry.
    ///
    /// # Errors
    ///
    /// - `Conflict` on a duplicate id, level, or second free plan
    async fn save(&self, plan: &Plan) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError>;

    async fn find_by_provider_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, DomainError>;

    /// Stores the product id unless one is already set.
    ///
    /// # Errors
    ///
    /// - `PlanNotFound` if the plan does not exist
    async fn set_provider_product_id_if_absent(
        &self,
        id: &PlanId,
        product_id: &str,
    ) -> Result<ConditionalWrite, DomainError>;

    /// Stores the price id unless one is already set.
    ///
    /// # Errors
    ///
    /// - `PlanNotFound` if the plan does not exist
    async fn set_provider_price_id_if_absent(
        &self,
        id: &PlanId,
        price_id: &str,
    ) -> Result<ConditionalWrite, DomainError>;

    /// Swaps the price id only if it still equals `expected`.
    ///
    /// Returns false when another writer changed it first.
    async fn replace_provider_price_id(
        &self,
        id: &PlanId,
        expected: &str,
        price_id: &str,
    ) -> Result<bool, DomainError>;

    /// Updates the plan's commercial terms.
    ///
    /// # Errors
    ///
    /// - `PlanNotFound` if the plan does not exist
    async fn update_terms(
        &self,
        id: &PlanId,
        price: i64,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn PlanRepository) {}
    }
}
