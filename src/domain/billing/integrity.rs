//! Cross-check between a local plan and its provider catalog objects.
//!
//! The plan owns catalog data (amount, currency, interval); the provider
//! objects must agree with it. Drift is reported, never repaired here.

use serde::Serialize;
use std::fmt;

use super::errors::BillingError;
use super::plan::Plan;
use crate::domain::foundation::PlanId;
use crate::ports::{ProviderPrice, ProviderProduct};

/// One reason a plan fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Provider ids are missing locally.
    NotSynced { missing: String },
    /// Stored product id no longer resolves.
    StaleProduct { product_id: String },
    /// Stored price id no longer resolves.
    StalePrice { price_id: String },
    AmountMismatch { provider: Option<i64>, local: i64 },
    CurrencyMismatch { provider: String, local: String },
    IntervalMismatch { provider: Option<String>, local: String },
    /// The stored price belongs to a different product.
    ForeignPrice { price_product_id: String, plan_product_id: String },
    /// The stored price is archived and cannot start subscriptions.
    InactivePrice { price_id: String },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::NotSynced { missing } => write!(f, "not synced (missing {})", missing),
            Discrepancy::StaleProduct { product_id } => {
                write!(f, "stale id, product {} deleted upstream", product_id)
            }
            Discrepancy::StalePrice { price_id } => {
                write!(f, "stale id, price {} deleted upstream", price_id)
            }
            Discrepancy::AmountMismatch { provider, local } => match provider {
                Some(amount) => write!(f, "amount mismatch ({} vs {})", amount, local),
                None => write!(f, "amount mismatch (none vs {})", local),
            },
            Discrepancy::CurrencyMismatch { provider, local } => {
                write!(f, "currency mismatch ({} vs {})", provider, local)
            }
            Discrepancy::IntervalMismatch { provider, local } => write!(
                f,
                "interval mismatch ({} vs {})",
                provider.as_deref().unwrap_or("one-time"),
                local
            ),
            Discrepancy::ForeignPrice {
                price_product_id,
                plan_product_id,
            } => write!(
                f,
                "price belongs to product {} instead of {}",
                price_product_id, plan_product_id
            ),
            Discrepancy::InactivePrice { price_id } => write!(f, "price {} is archived", price_id),
        }
    }
}

/// Compares resolved provider objects against the plan.
///
/// Amounts compare in minor units; currency compares case-insensitively.
pub fn compare_catalog(
    plan: &Plan,
    product: &ProviderProduct,
    price: &ProviderPrice,
) -> Vec<Discrepancy> {
    let mut found = Vec::new();

    if price.unit_amount != Some(plan.price) {
        found.push(Discrepancy::AmountMismatch {
            provider: price.unit_amount,
            local: plan.price,
        });
    }

    if !price.currency.eq_ignore_ascii_case(&plan.currency) {
        found.push(Discrepancy::CurrencyMismatch {
            provider: price.currency.to_ascii_lowercase(),
            local: plan.currency.clone(),
        });
    }

    if price.interval.as_deref() != Some(plan.interval.as_str()) {
        found.push(Discrepancy::IntervalMismatch {
            provider: price.interval.clone(),
            local: plan.interval.to_string(),
        });
    }

    if price.product_id != product.id {
        found.push(Discrepancy::ForeignPrice {
            price_product_id: price.product_id.clone(),
            plan_product_id: product.id.clone(),
        });
    }

    if !price.active {
        found.push(Discrepancy::InactivePrice {
            price_id: price.id.clone(),
        });
    }

    found
}

/// Result of `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub plan_id: PlanId,
    pub valid: bool,
    /// Human-readable explanation.
    pub reason: String,
    pub discrepancies: Vec<Discrepancy>,
}

impl ValidationReport {
    pub fn valid(plan_id: PlanId, reason: impl Into<String>) -> Self {
        Self {
            plan_id,
            valid: true,
            reason: reason.into(),
            discrepancies: Vec::new(),
        }
    }

    /// Builds a report from discrepancies; an empty list is valid.
    pub fn from_discrepancies(plan_id: PlanId, discrepancies: Vec<Discrepancy>) -> Self {
        if discrepancies.is_empty() {
            return Self::valid(plan_id, "provider product and price match the plan");
        }
        let reason = discrepancies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            plan_id,
            valid: false,
            reason,
            discrepancies,
        }
    }

    /// Converts an invalid report into `IntegrityMismatch`.
    pub fn ensure_valid(&self) -> Result<(), BillingError> {
        if self.valid {
            Ok(())
        } else {
            Err(BillingError::IntegrityMismatch(format!(
                "plan {}: {}",
                self.plan_id, self.reason
            )))
        }
    }
}
