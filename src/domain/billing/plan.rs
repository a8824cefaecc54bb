//! Catalog plans and their link to provider products and prices.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{PlanId, ValidationError};

/// Billing cadence of a paid plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

impl BillingInterval {
    /// Provider wire value (`recurring[interval]`).
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "month" => Some(BillingInterval::Month),
            "year" => Some(BillingInterval::Year),
            _ => None,
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a plan's provider linkage has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSyncState {
    /// Free plans never get provider objects.
    NotApplicable,
    /// Neither product nor price id is stored.
    Unsynced,
    /// Product id stored but price id missing (or the reverse).
    PartiallySynced,
    /// Both ids stored.
    Synced,
}

/// A subscription plan in the local catalog.
///
/// `price` is held in minor currency units (cents for USD). Provider ids
/// are populated lazily and never overwritten once set, except that a
/// pricing change swaps in a freshly minted price id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub is_free: bool,
    pub level: i32,
    pub provider_product_id: Option<String>,
    pub provider_price_id: Option<String>,
}

impl Plan {
    /// Creates an unsynced paid plan.
    pub fn paid(
        id: PlanId,
        name: impl Into<String>,
        price: i64,
        currency: &str,
        interval: BillingInterval,
        level: i32,
    ) -> Result<Self, ValidationError> {
        validate_price(price)?;
        Ok(Self {
            id,
            name: name.into(),
            price,
            currency: normalize_currency(currency)?,
            interval,
            is_free: false,
            level,
            provider_product_id: None,
            provider_price_id: None,
        })
    }

    /// Creates the catalog's free plan.
    pub fn free(id: PlanId, name: impl Into<String>, currency: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            name: name.into(),
            price: 0,
            currency: normalize_currency(currency)?,
            interval: BillingInterval::Month,
            is_free: true,
            level: 0,
            provider_product_id: None,
            provider_price_id: None,
        })
    }

    pub fn sync_state(&self) -> PlanSyncState {
        if self.is_free {
            return PlanSyncState::NotApplicable;
        }
        match (&self.provider_product_id, &self.provider_price_id) {
            (Some(_), Some(_)) => PlanSyncState::Synced,
            (None, None) => PlanSyncState::Unsynced,
            _ => PlanSyncState::PartiallySynced,
        }
    }

    /// Idempotency key for creating this plan's provider product.
    pub fn product_idempotency_key(&self) -> String {
        format!("plan-{}-product", self.id)
    }

    /// Idempotency key for creating a provider price with the current terms.
    ///
    /// Changing any of amount, currency or interval yields a new key, so a
    /// pricing change mints a distinct provider price.
    pub fn price_idempotency_key(&self) -> String {
        format!(
            "plan-{}-price-{}-{}-{}",
            self.id, self.price, self.currency, self.interval
        )
    }

    /// Amount rendered in major units, e.g. `9.99 USD`.
    pub fn display_price(&self) -> String {
        let exponent = currency_exponent(&self.currency);
        if exponent == 0 {
            return format!("{} {}", self.price, self.currency.to_uppercase());
        }
        let divisor = 10_i64.pow(exponent);
        format!(
            "{}.{:0width$} {}",
            self.price / divisor,
            self.price % divisor,
            self.currency.to_uppercase(),
            width = exponent as usize
        )
    }
}

/// Validates a price in minor units.
pub fn validate_price(price: i64) -> Result<(), ValidationError> {
    if price < 0 {
        return Err(ValidationError::out_of_range("price", 0, i64::MAX, price));
    }
    Ok(())
}

/// Lowercases and checks an ISO-4217 currency code.
pub fn normalize_currency(currency: &str) -> Result<String, ValidationError> {
    let normalized = currency.trim().to_ascii_lowercase();
    if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::invalid_format(
            "currency",
            "must be a three-letter ISO 4217 code",
        ));
    }
    Ok(normalized)
}

/// Number of decimal places the provider uses for a currency.
fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_lowercase().as_str() {
        "bif" | "clp" | "djf" | "gnf" | "jpy" | "kmf" | "krw" | "mga" | "pyg" | "rwf" | "ugx"
        | "vnd" | "vuv" | "xaf" | "xof" | "xpf" => 0,
        "bhd" | "jod" | "kwd" | "omr" | "tnd" => 3,
        _ => 2,
    }
}
