//! Mock provider gateway for testing.
//!
//! An in-memory stand-in for the payment provider. Supports:
//! - Idempotency keys (a repeated key returns the original object)
//! - Error injection, persistent or one-shot, per method
//! - Call tracking
//! - Seeding and deleting upstream objects to simulate drift

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::billing::BillingInterval;
use crate::domain::foundation::Timestamp;
use crate::ports::{
    CreateCustomerRequest, CreatePriceRequest, CreateProductRequest, CreateSubscriptionRequest,
    ProviderCustomer, ProviderError, ProviderGateway, ProviderPrice, ProviderProduct,
    ProviderSubscription,
};

/// Mock provider gateway.
///
/// # Example
///
/// ```ignore
/// let gateway = MockProviderGateway::new();
/// gateway.fail_next("create_price", ProviderError::unavailable("timeout"));
/// let report = sync_plan(&gateway, ...).await?;
/// assert_eq!(gateway.product_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockProviderGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    customers: HashMap<String, ProviderCustomer>,
    products: HashMap<String, ProviderProduct>,
    prices: HashMap<String, ProviderPrice>,
    subscriptions: HashMap<String, ProviderSubscription>,

    /// Idempotency key → id of the object the key created.
    idempotent_results: HashMap<String, String>,

    /// Customers created since this flag was set are invisible to search.
    search_lag: bool,
    searchable_customers: Vec<String>,

    next_id: u64,

    /// Errors returned on every call of a method until cleared.
    method_errors: HashMap<String, ProviderError>,
    /// Errors returned once, in order, per method.
    queued_errors: HashMap<String, VecDeque<ProviderError>>,

    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_mock{}", prefix, self.next_id)
    }

    fn record(&mut self, method: &str, args: Vec<String>) -> Result<(), ProviderError> {
        self.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        if let Some(err) = self.queued_errors.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.method_errors.get(method) {
            return Err(err.clone());
        }
        Ok(())
    }
}

impl MockProviderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Fail every call to `method` until `clear_errors`.
    pub fn set_method_error(&self, method: &str, error: ProviderError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    /// Fail the next call to `method` once.
    pub fn fail_next(&self, method: &str, error: ProviderError) {
        self.state()
            .queued_errors
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.method_errors.clear();
        state.queued_errors.clear();
    }

    /// Simulates eventually consistent search: customers created from now on
    /// are not returned by `find_customer_by_email`.
    pub fn lag_customer_search(&self) {
        self.state().search_lag = true;
    }

    pub fn insert_customer(&self, customer: ProviderCustomer) {
        let mut state = self.state();
        state.searchable_customers.push(customer.id.clone());
        state.customers.insert(customer.id.clone(), customer);
    }

    pub fn insert_product(&self, product: ProviderProduct) {
        self.state().products.insert(product.id.clone(), product);
    }

    pub fn insert_price(&self, price: ProviderPrice) {
        self.state().prices.insert(price.id.clone(), price);
    }

    pub fn insert_subscription(&self, subscription: ProviderSubscription) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Removes a price upstream, as if deleted in the provider dashboard.
    pub fn delete_price(&self, price_id: &str) {
        self.state().prices.remove(price_id);
    }

    pub fn delete_product(&self, product_id: &str) {
        self.state().products.remove(product_id);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Inspection
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    pub fn customer_count(&self) -> usize {
        self.state().customers.len()
    }

    pub fn product_count(&self) -> usize {
        self.state().products.len()
    }

    pub fn price_count(&self) -> usize {
        self.state().prices.len()
    }

    pub fn subscription(&self, id: &str) -> Option<ProviderSubscription> {
        self.state().subscriptions.get(id).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    pub fn price(&self, id: &str) -> Option<ProviderPrice> {
        self.state().prices.get(id).cloned()
    }
}

fn period_days(interval: Option<&str>) -> i64 {
    match interval.and_then(BillingInterval::parse) {
        Some(BillingInterval::Year) => 365,
        _ => 30,
    }
}

#[async_trait]
impl ProviderGateway for MockProviderGateway {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderCustomer>, ProviderError> {
        let mut state = self.state();
        state.record("find_customer_by_email", vec![email.to_string()])?;
        let found = state
            .searchable_customers
            .iter()
            .filter_map(|id| state.customers.get(id))
            .find(|c| c.email.as_deref() == Some(email))
            .cloned();
        Ok(found)
    }

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, ProviderError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(
            "create_customer",
            vec![request.email.clone(), request.idempotency_key.clone()],
        )?;
        if let Some(id) = state.idempotent_results.get(&request.idempotency_key) {
            if let Some(existing) = state.customers.get(id) {
                return Ok(existing.clone());
            }
        }
        let customer = ProviderCustomer {
            id: state.mint("cus"),
            email: Some(request.email),
        };
        state
            .idempotent_results
            .insert(request.idempotency_key, customer.id.clone());
        if !state.search_lag {
            state.searchable_customers.push(customer.id.clone());
        }
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProviderProduct, ProviderError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(
            "create_product",
            vec![request.plan_id.to_string(), request.idempotency_key.clone()],
        )?;
        if let Some(id) = state.idempotent_results.get(&request.idempotency_key) {
            if let Some(existing) = state.products.get(id) {
                return Ok(existing.clone());
            }
        }
        let product = ProviderProduct {
            id: state.mint("prod"),
            name: request.name,
            active: true,
        };
        state
            .idempotent_results
            .insert(request.idempotency_key, product.id.clone());
        state.products.insert(product.id.clone(), product.clone());
        Ok(product)
    }

    async fn create_price(
        &self,
        request: CreatePriceRequest,
    ) -> Result<ProviderPrice, ProviderError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(
            "create_price",
            vec![request.product_id.clone(), request.idempotency_key.clone()],
        )?;
        if !state.products.contains_key(&request.product_id) {
            return Err(ProviderError::from_status(
                400,
                format!("No such product: '{}'", request.product_id),
            ));
        }
        if let Some(id) = state.idempotent_results.get(&request.idempotency_key) {
            if let Some(existing) = state.prices.get(id) {
                return Ok(existing.clone());
            }
        }
        let price = ProviderPrice {
            id: state.mint("price"),
            product_id: request.product_id,
            unit_amount: Some(request.unit_amount),
            currency: request.currency,
            interval: Some(request.interval.to_string()),
            active: true,
        };
        state
            .idempotent_results
            .insert(request.idempotency_key, price.id.clone());
        state.prices.insert(price.id.clone(), price.clone());
        Ok(price)
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(
            "create_subscription",
            vec![
                request.customer_id.clone(),
                request.price_id.clone(),
                request.idempotency_key.clone(),
            ],
        )?;
        if let Some(id) = state.idempotent_results.get(&request.idempotency_key) {
            if let Some(existing) = state.subscriptions.get(id) {
                return Ok(existing.clone());
            }
        }
        if !state.customers.contains_key(&request.customer_id) {
            return Err(ProviderError::from_status(
                400,
                format!("No such customer: '{}'", request.customer_id),
            ));
        }
        let price = state.prices.get(&request.price_id).cloned().ok_or_else(|| {
            ProviderError::from_status(400, format!("No such price: '{}'", request.price_id))
        })?;

        let start = Timestamp::now();
        let subscription = ProviderSubscription {
            id: state.mint("sub"),
            customer_id: request.customer_id,
            status: "active".to_string(),
            current_period_start: Some(start),
            current_period_end: Some(
                start.plus_secs(period_days(price.interval.as_deref()) * 86_400),
            ),
            canceled_at: None,
            price_id: Some(price.id),
            product_id: Some(price.product_id),
        };
        state
            .idempotent_results
            .insert(request.idempotency_key, subscription.id.clone());
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError> {
        let mut state = self.state();
        state.record("get_subscription", vec![subscription_id.to_string()])?;
        Ok(state.subscriptions.get(subscription_id).cloned())
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<ProviderProduct>, ProviderError> {
        let mut state = self.state();
        state.record("get_product", vec![product_id.to_string()])?;
        Ok(state.products.get(product_id).cloned())
    }

    async fn get_price(&self, price_id: &str) -> Result<Option<ProviderPrice>, ProviderError> {
        let mut state = self.state();
        state.record("get_price", vec![price_id.to_string()])?;
        Ok(state.prices.get(price_id).cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let mut state = self.state();
        state.record("cancel_subscription", vec![subscription_id.to_string()])?;
        let subscription = state.subscriptions.get_mut(subscription_id).ok_or_else(|| {
            ProviderError::from_status(404, format!("No such subscription: '{}'", subscription_id))
        })?;
        subscription.status = "canceled".to_string();
        subscription.canceled_at = Some(Timestamp::now());
        Ok(subscription.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{PlanId, UserId};

    fn product_request(key: &str) -> CreateProductRequest {
        CreateProductRequest {
            plan_id: PlanId::new("pro").unwrap(),
            name: "Pro".into(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn repeated_idempotency_key_returns_same_object() {
        let gateway = MockProviderGateway::new();

        let first = gateway.create_product(product_request("k1")).await.unwrap();
        let second = gateway.create_product(product_request("k1")).await.unwrap();
        let third = gateway.create_product(product_request("k2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, third.id);
        assert_eq!(gateway.product_count(), 2);
    }

    #[tokio::test]
    async fn queued_error_fires_once() {
        let gateway = MockProviderGateway::new();
        gateway.fail_next("create_product", ProviderError::unavailable("timeout"));

        assert!(gateway.create_product(product_request("k1")).await.is_err());
        assert!(gateway.create_product(product_request("k1")).await.is_ok());
        assert_eq!(gateway.call_count("create_product"), 2);
    }

    #[tokio::test]
    async fn lagging_search_hides_new_customers() {
        let gateway = MockProviderGateway::new();
        gateway.lag_customer_search();
        let request = CreateCustomerRequest::new(UserId::new("u1").unwrap(), "a@example.com", None);

        let created = gateway.create_customer(request.clone()).await.unwrap();
        let found = gateway.find_customer_by_email("a@example.com").await.unwrap();
        let again = gateway.create_customer(request).await.unwrap();

        assert!(found.is_none());
        assert_eq!(created.id, again.id);
        assert_eq!(gateway.customer_count(), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_subscription_is_404() {
        let gateway = MockProviderGateway::new();

        let err = gateway.cancel_subscription("sub_x").await.unwrap_err();

        assert_eq!(err.status, Some(404));
        assert!(!err.is_retryable());
    }
}
