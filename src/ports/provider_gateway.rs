//! Provider gateway port for the external payment provider.
//!
//! Defines the narrow set of catalog, customer and subscription calls the
//! sync engine makes. Create calls carry an idempotency key so a retried or
//! concurrent create returns the object minted by the first call.
//!
//! # Error contract
//!
//! - Network failures, timeouts, 429 and 5xx responses → `Unavailable`
//!   (the remote side effect may or may not have happened)
//! - Other 4xx responses → `Rejected`
//! - 404 on a read → `Ok(None)`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{BillingInterval, SubscriptionSnapshot};
use crate::domain::foundation::{PlanId, Timestamp, UserId};

/// Port for payment provider integrations.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Search customers by email.
    ///
    /// Provider search is eventually consistent; `None` is weak evidence of
    /// absence, which is why customer creation also carries an idempotency key.
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderCustomer>, ProviderError>;

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, ProviderError>;

    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProviderProduct, ProviderError>;

    async fn create_price(&self, request: CreatePriceRequest)
        -> Result<ProviderPrice, ProviderError>;

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError>;

    async fn get_product(&self, product_id: &str) -> Result<Option<ProviderProduct>, ProviderError>;

    async fn get_price(&self, price_id: &str) -> Result<Option<ProviderPrice>, ProviderError>;

    /// Cancel a subscription immediately.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Returns the customer for `request.email`, creating it only when the
    /// search finds nothing.
    async fn find_or_create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<CustomerResolution, ProviderError> {
        if let Some(existing) = self.find_customer_by_email(&request.email).await? {
            return Ok(CustomerResolution::Found(existing));
        }
        let created = self.create_customer(request).await?;
        Ok(CustomerResolution::Created(created))
    }
}

/// Request to create a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    /// Internal user ID (stored as metadata).
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub idempotency_key: String,
}

impl CreateCustomerRequest {
    pub fn new(user_id: UserId, email: impl Into<String>, name: Option<String>) -> Self {
        let idempotency_key = format!("user-{}-customer", user_id);
        Self {
            user_id,
            email: email.into(),
            name,
            idempotency_key,
        }
    }
}

/// Request to create a catalog product for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    /// Stored as product metadata so the product points back at the plan.
    pub plan_id: PlanId,
    pub name: String,
    pub idempotency_key: String,
}

/// Request to create a recurring price on a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePriceRequest {
    pub product_id: String,
    pub plan_id: PlanId,
    /// Amount in minor currency units.
    pub unit_amount: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub idempotency_key: String,
}

/// Request to create a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    /// Stored as subscription metadata (`userId`).
    pub user_id: UserId,
    /// Stored as subscription metadata (`planId`).
    pub plan_id: PlanId,
    pub idempotency_key: String,
}

impl CreateSubscriptionRequest {
    pub fn new(customer_id: impl Into<String>, price_id: impl Into<String>, user_id: UserId, plan_id: PlanId) -> Self {
        let price_id = price_id.into();
        let idempotency_key = format!("user-{}-subscription-{}", user_id, price_id);
        Self {
            customer_id: customer_id.into(),
            price_id,
            user_id,
            plan_id,
            idempotency_key,
        }
    }

    /// Scopes the idempotency key to one generation of the user record.
    ///
    /// A user who leaves a plan and later returns to it must get a fresh
    /// subscription rather than the canceled one the provider remembers for
    /// the unscoped key.
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.idempotency_key = format!(
            "user-{}-subscription-{}-g{}",
            self.user_id, self.price_id, generation
        );
        self
    }
}

/// Customer in the payment system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// How `find_or_create_customer` obtained the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerResolution {
    Found(ProviderCustomer),
    Created(ProviderCustomer),
}

impl CustomerResolution {
    pub fn customer(&self) -> &ProviderCustomer {
        match self {
            CustomerResolution::Found(c) | CustomerResolution::Created(c) => c,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CustomerResolution::Created(_))
    }
}

/// Catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProduct {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Catalog price. Prices are immutable at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPrice {
    pub id: String,
    pub product_id: String,
    /// Amount in minor currency units; absent for tiered prices.
    pub unit_amount: Option<i64>,
    pub currency: String,
    /// Recurring interval; absent for one-time prices.
    pub interval: Option<String>,
    pub active: bool,
}

/// Subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    /// Raw provider status string.
    pub status: String,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
    pub price_id: Option<String>,
    pub product_id: Option<String>,
}

impl ProviderSubscription {
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: self.id.clone(),
            customer_id: Some(self.customer_id.clone()),
            status: self.status.clone(),
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            canceled_at: self.canceled_at,
        }
    }
}

/// Failure category for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Network failure, timeout, rate limit or 5xx.
    Unavailable,
    /// 4xx other than rate limiting: bad request, auth, invalid id.
    Rejected,
}

/// Errors from provider gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Provider's error code (if available).
    pub provider_code: Option<String>,
    /// HTTP status of the failed call (if one was received).
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_code: None,
            status: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }

    /// Classifies an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = if status == 429 || status >= 500 {
            ProviderErrorKind::Unavailable
        } else {
            ProviderErrorKind::Rejected
        };
        Self {
            status: Some(status),
            ..Self::new(kind, message)
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Unavailable
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ProviderErrorKind::Unavailable => "provider unavailable",
            ProviderErrorKind::Rejected => "provider rejected request",
        };
        match &self.provider_code {
            Some(code) => write!(f, "{} ({}): {}", kind, code, self.message),
            None => write!(f, "{}: {}", kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}
