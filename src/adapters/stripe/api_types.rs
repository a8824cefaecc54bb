//! Stripe REST API response types.
//!
//! Only the fields the gateway reads are modeled; unknown fields are ignored.

use serde::Deserialize;
use std::collections::HashMap;

use crate::domain::foundation::Timestamp;
use crate::ports::{ProviderCustomer, ProviderPrice, ProviderProduct, ProviderSubscription};

/// List envelope (`{"object":"list","data":[...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe Customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    /// Unique customer identifier (cus_...).
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Whether the customer has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl From<StripeCustomer> for ProviderCustomer {
    fn from(customer: StripeCustomer) -> Self {
        ProviderCustomer {
            id: customer.id,
            email: customer.email,
        }
    }
}

/// Stripe Product object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeProduct {
    /// Unique product identifier (prod_...).
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_true() -> bool {
    true
}

impl From<StripeProduct> for ProviderProduct {
    fn from(product: StripeProduct) -> Self {
        ProviderProduct {
            id: product.id,
            name: product.name,
            active: product.active,
        }
    }
}

/// Stripe Price object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    /// Price ID (price_...).
    pub id: String,
    /// Product ID this price is for.
    pub product: String,
    /// Unit amount in minor units.
    pub unit_amount: Option<i64>,
    /// Currency (lowercase, e.g., "usd").
    pub currency: String,
    /// Recurring configuration; absent for one-time prices.
    pub recurring: Option<StripePriceRecurring>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Price recurring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePriceRecurring {
    /// Billing interval (day, week, month, year).
    pub interval: String,
    #[serde(default = "default_interval_count")]
    pub interval_count: i32,
}

fn default_interval_count() -> i32 {
    1
}

impl From<StripePrice> for ProviderPrice {
    fn from(price: StripePrice) -> Self {
        // "every 3 months" is not "month"; report it verbatim so validation flags it.
        let interval = price.recurring.map(|r| {
            if r.interval_count == 1 {
                r.interval
            } else {
                format!("{} x{}", r.interval, r.interval_count)
            }
        });
        ProviderPrice {
            id: price.id,
            product_id: price.product,
            unit_amount: price.unit_amount,
            currency: price.currency,
            interval,
            active: price.active,
        }
    }
}

/// Stripe Subscription object.
///
/// Newer API versions report billing periods on the items rather than the
/// subscription; both are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    /// Unique subscription identifier (sub_...).
    pub id: String,
    /// Customer ID owning this subscription.
    pub customer: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub canceled_at: Option<i64>,
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

/// Single subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

impl From<StripeSubscription> for ProviderSubscription {
    fn from(sub: StripeSubscription) -> Self {
        let item = sub.items.data.into_iter().next();
        let period_start = sub
            .current_period_start
            .or_else(|| item.as_ref().and_then(|i| i.current_period_start));
        let period_end = sub
            .current_period_end
            .or_else(|| item.as_ref().and_then(|i| i.current_period_end));

        ProviderSubscription {
            id: sub.id,
            customer_id: sub.customer,
            status: sub.status,
            current_period_start: period_start.and_then(Timestamp::from_unix_secs),
            current_period_end: period_end.and_then(Timestamp::from_unix_secs),
            canceled_at: sub
                .canceled_at
                .or(sub.ended_at)
                .and_then(Timestamp::from_unix_secs),
            price_id: item.as_ref().map(|i| i.price.id.clone()),
            product_id: item.map(|i| i.price.product),
        }
    }
}

/// Error envelope returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    pub error: StripeErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}
