//! Inbound payment provider events.
//!
//! The envelope mirrors the provider's webhook JSON. [`ProviderEvent::kind`]
//! turns it into a closed union over the event types this engine acts on,
//! with an explicit variant for everything else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::user::SubscriptionSnapshot;
use super::webhook_errors::WebhookError;
use crate::domain::foundation::Timestamp;

/// Provider webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    /// Unique identifier for the event (evt_xxx format); the dedup key.
    pub id: String,

    /// Type of event (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    pub created: i64,

    pub data: ProviderEventData,

    #[serde(default)]
    pub livemode: bool,

    #[serde(default)]
    pub api_version: Option<String>,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventData {
    /// The object that triggered the event (polymorphic based on event type).
    pub object: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

/// Event types the engine distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEventKind {
    CheckoutSessionCompleted(CheckoutSessionObject),
    SubscriptionCreated(SubscriptionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    InvoicePaymentSucceeded(InvoiceObject),
    PaymentIntentSucceeded(PaymentIntentObject),
    /// Any other event type; acknowledged and ignored.
    Unrecognized(String),
}

impl ProviderEventKind {
    pub fn name(&self) -> &str {
        match self {
            ProviderEventKind::CheckoutSessionCompleted(_) => "checkout.session.completed",
            ProviderEventKind::SubscriptionCreated(_) => "customer.subscription.created",
            ProviderEventKind::SubscriptionUpdated(_) => "customer.subscription.updated",
            ProviderEventKind::SubscriptionDeleted(_) => "customer.subscription.deleted",
            ProviderEventKind::InvoicePaymentSucceeded(_) => "invoice.payment_succeeded",
            ProviderEventKind::PaymentIntentSucceeded(_) => "payment_intent.succeeded",
            ProviderEventKind::Unrecognized(name) => name,
        }
    }
}

impl ProviderEvent {
    /// Parses the event into its typed kind.
    ///
    /// A known event type whose object fails to parse is a `ParseError`;
    /// unknown types never fail.
    pub fn kind(&self) -> Result<ProviderEventKind, WebhookError> {
        let kind = match self.event_type.as_str() {
            "checkout.session.completed" => {
                ProviderEventKind::CheckoutSessionCompleted(self.object("checkout session")?)
            }
            "customer.subscription.created" => {
                ProviderEventKind::SubscriptionCreated(self.object("subscription")?)
            }
            "customer.subscription.updated" => {
                ProviderEventKind::SubscriptionUpdated(self.object("subscription")?)
            }
            "customer.subscription.deleted" => {
                ProviderEventKind::SubscriptionDeleted(self.object("subscription")?)
            }
            "invoice.payment_succeeded" => {
                ProviderEventKind::InvoicePaymentSucceeded(self.object("invoice")?)
            }
            "payment_intent.succeeded" => {
                ProviderEventKind::PaymentIntentSucceeded(self.object("payment intent")?)
            }
            other => ProviderEventKind::Unrecognized(other.to_string()),
        };
        Ok(kind)
    }

    fn object<T: serde::de::DeserializeOwned>(&self, what: &str) -> Result<T, WebhookError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::ParseError(format!("Invalid {}: {}", what, e)))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Event objects
// ════════════════════════════════════════════════════════════════════════════════

/// Checkout session fields used by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub invoice: Option<String>,
    pub payment_intent: Option<String>,
    /// Total in minor units.
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn user_id(&self) -> Option<&str> {
        metadata_value(&self.metadata, &["userId", "user_id"])
    }

    pub fn plan_id(&self) -> Option<&str> {
        metadata_value(&self.metadata, &["planId", "plan_id"])
    }
}

/// Subscription fields used by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub canceled_at: Option<i64>,
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionItem {
    pub id: Option<String>,
    pub price: Option<SubscriptionItemPrice>,
    /// Newer API versions report periods per item.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionItemPrice {
    pub id: String,
    pub product: Option<String>,
}

impl SubscriptionObject {
    pub fn user_id(&self) -> Option<&str> {
        metadata_value(&self.metadata, &["userId", "user_id"])
    }

    pub fn plan_id(&self) -> Option<&str> {
        metadata_value(&self.metadata, &["planId", "plan_id"])
    }

    /// Product id of the first subscription item.
    pub fn product_id(&self) -> Option<&str> {
        self.items
            .data
            .iter()
            .find_map(|item| item.price.as_ref().and_then(|p| p.product.as_deref()))
    }

    /// Provider-side state, with item-level periods as fallback.
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let first_item = self.items.data.first();
        let start = self
            .current_period_start
            .or_else(|| first_item.and_then(|i| i.current_period_start));
        let end = self
            .current_period_end
            .or_else(|| first_item.and_then(|i| i.current_period_end));

        SubscriptionSnapshot {
            subscription_id: self.id.clone(),
            customer_id: self.customer.clone(),
            status: self.status.clone(),
            current_period_start: start.and_then(Timestamp::from_unix_secs),
            current_period_end: end.and_then(Timestamp::from_unix_secs),
            canceled_at: self
                .canceled_at
                .or(self.ended_at)
                .and_then(Timestamp::from_unix_secs),
        }
    }
}

/// Invoice fields used by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    pub currency: String,
    pub status: Option<String>,
}

/// Payment intent fields used by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PaymentIntentObject {
    pub id: String,
    pub customer: Option<String>,
    pub invoice: Option<String>,
    #[serde(default)]
    pub amount: i64,
    pub amount_received: Option<i64>,
    pub currency: String,
    pub status: Option<String>,
}

impl PaymentIntentObject {
    pub fn settled_amount(&self) -> i64 {
        self.amount_received.unwrap_or(self.amount)
    }
}

fn metadata_value<'a>(metadata: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| metadata.get(*key))
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Builder for creating test ProviderEvent instances.
#[cfg(test)]
pub struct ProviderEventBuilder {
    id: String,
    event_type: String,
    created: i64,
    object: serde_json::Value,
    livemode: bool,
}

#[cfg(test)]
impl Default for ProviderEventBuilder {
    fn default() -> Self {
        Self {
            id: "evt_test_123".to_string(),
            event_type: "checkout.session.completed".to_string(),
            created: chrono::Utc::now().timestamp(),
            object: serde_json::json!({}),
            livemode: false,
        }
    }
}

#[cfg(test)]
impl ProviderEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn object(mut self, object: serde_json::Value) -> Self {
        self.object = object;
        self
    }

    pub fn livemode(mut self, livemode: bool) -> Self {
        self.livemode = livemode;
        self
    }

    pub fn build(self) -> ProviderEvent {
        ProviderEvent {
            id: self.id,
            event_type: self.event_type,
            created: self.created,
            data: ProviderEventData {
                object: self.object,
                previous_attributes: None,
            },
            livemode: self.livemode,
            api_version: Some("2023-10-16".to_string()),
        }
    }
}
