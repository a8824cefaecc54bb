//! Stripe provider gateway adapter.
//!
//! Implements `ProviderGateway` over the Stripe REST API: bearer auth,
//! form-encoded bodies, JSON responses.
//!
//! # Failure semantics
//!
//! Every request has a bounded timeout. A timeout, connection failure, 429
//! or 5xx is `Unavailable`: the caller cannot know whether the remote side
//! effect happened, so create calls send an `Idempotency-Key` and a retry
//! returns the object minted by the first attempt.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key).with_timeouts(Duration::from_secs(10), Duration::from_secs(5));
//! let gateway = StripeGateway::new(config)?;
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::ports::{
    CreateCustomerRequest, CreatePriceRequest, CreateProductRequest, CreateSubscriptionRequest,
    ProviderCustomer, ProviderError, ProviderGateway, ProviderPrice, ProviderProduct,
    ProviderSubscription,
};

use super::api_types::{
    StripeCustomer, StripeErrorBody, StripeList, StripePrice, StripeProduct, StripeSubscription,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    request_timeout: Duration,
    connect_timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeouts(mut self, request: Duration, connect: Duration) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }
}

/// Stripe implementation of `ProviderGateway`.
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProviderError::unavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, ProviderError> {
        let mut request = self
            .http_client
            .post(self.url(path))
            .bearer_auth(self.config.api_key.expose_secret())
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| network_error(operation, e))?;
        read_json(operation, response).await
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ProviderError> {
        let response = self
            .http_client
            .get(self.url(path))
            .bearer_auth(self.config.api_key.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| network_error(operation, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(operation, response).await.map(Some)
    }
}

fn network_error(operation: &'static str, err: reqwest::Error) -> ProviderError {
    let reason = if err.is_timeout() { "timed out" } else { "request failed" };
    tracing::warn!(operation, error = %err, "Stripe {}", reason);
    ProviderError::unavailable(format!("Stripe {} {}: {}", operation, reason, err))
}

async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let err = error_from_body(status.as_u16(), &body);
        tracing::error!(
            operation,
            status = status.as_u16(),
            provider_code = err.provider_code.as_deref().unwrap_or(""),
            error = %err.message,
            "Stripe API error"
        );
        return Err(err);
    }

    // A success whose body cannot be read leaves the outcome unknown.
    response.json::<T>().await.map_err(|e| {
        ProviderError::unavailable(format!("Failed to parse Stripe {} response: {}", operation, e))
    })
}

fn error_from_body(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => {
            let message = parsed
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {}", status));
            let err = ProviderError::from_status(status, message);
            match parsed.error.code {
                Some(code) => err.with_provider_code(code),
                None => err,
            }
        }
        Err(_) => ProviderError::from_status(status, format!("HTTP {}: {}", status, body)),
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderCustomer>, ProviderError> {
        let list: Option<StripeList<StripeCustomer>> = self
            .get_optional("list_customers", "/v1/customers", &[("email", email), ("limit", "1")])
            .await?;

        Ok(list
            .and_then(|l| l.data.into_iter().find(|c| !c.deleted))
            .map(ProviderCustomer::from))
    }

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, ProviderError> {
        let mut params = vec![
            ("email", request.email.clone()),
            ("metadata[userId]", request.user_id.to_string()),
        ];
        if let Some(name) = &request.name {
            params.push(("name", name.clone()));
        }

        let customer: StripeCustomer = self
            .post_form("create_customer", "/v1/customers", &params, Some(&request.idempotency_key))
            .await?;
        tracing::info!(user_id = %request.user_id, customer_id = %customer.id, "Stripe customer created");
        Ok(customer.into())
    }

    async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProviderProduct, ProviderError> {
        let params = vec![
            ("name", request.name.clone()),
            ("metadata[planId]", request.plan_id.to_string()),
        ];

        let product: StripeProduct = self
            .post_form("create_product", "/v1/products", &params, Some(&request.idempotency_key))
            .await?;
        tracing::info!(plan_id = %request.plan_id, product_id = %product.id, "Stripe product created");
        Ok(product.into())
    }

    async fn create_price(
        &self,
        request: CreatePriceRequest,
    ) -> Result<ProviderPrice, ProviderError> {
        let params = vec![
            ("product", request.product_id.clone()),
            ("unit_amount", request.unit_amount.to_string()),
            ("currency", request.currency.clone()),
            ("recurring[interval]", request.interval.to_string()),
            ("metadata[planId]", request.plan_id.to_string()),
        ];

        let price: StripePrice = self
            .post_form("create_price", "/v1/prices", &params, Some(&request.idempotency_key))
            .await?;
        tracing::info!(plan_id = %request.plan_id, price_id = %price.id, "Stripe price created");
        Ok(price.into())
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        let params = vec![
            ("customer", request.customer_id.clone()),
            ("items[0][price]", request.price_id.clone()),
            ("metadata[userId]", request.user_id.to_string()),
            ("metadata[planId]", request.plan_id.to_string()),
        ];

        let subscription: StripeSubscription = self
            .post_form(
                "create_subscription",
                "/v1/subscriptions",
                &params,
                Some(&request.idempotency_key),
            )
            .await?;
        tracing::info!(
            user_id = %request.user_id,
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Stripe subscription created"
        );
        Ok(subscription.into())
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<ProviderSubscription>, ProviderError> {
        let path = format!("/v1/subscriptions/{}", subscription_id);
        let subscription: Option<StripeSubscription> =
            self.get_optional("get_subscription", &path, &[]).await?;
        Ok(subscription.map(ProviderSubscription::from))
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<ProviderProduct>, ProviderError> {
        let path = format!("/v1/products/{}", product_id);
        let product: Option<StripeProduct> = self.get_optional("get_product", &path, &[]).await?;
        Ok(product.filter(|p| !p.deleted).map(ProviderProduct::from))
    }

    async fn get_price(&self, price_id: &str) -> Result<Option<ProviderPrice>, ProviderError> {
        let path = format!("/v1/prices/{}", price_id);
        let price: Option<StripePrice> = self.get_optional("get_price", &path, &[]).await?;
        Ok(price.map(ProviderPrice::from))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, ProviderError> {
        let path = format!("/v1/subscriptions/{}", subscription_id);
        let response = self
            .http_client
            .delete(self.url(&path))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| network_error("cancel_subscription", e))?;

        let subscription: StripeSubscription = read_json("cancel_subscription", response).await?;
        tracing::info!(subscription_id, "Stripe subscription canceled");
        Ok(subscription.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::BillingInterval;
    use crate::domain::foundation::{PlanId, UserId};
    use crate::ports::ProviderErrorKind;
    use mockito::Matcher;

    fn gateway(server: &mockito::Server) -> StripeGateway {
        let config = StripeConfig::new(SecretString::new("sk_test_123".to_string()))
            .with_base_url(server.url())
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(1));
        StripeGateway::new(config).unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Error classification
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn error_body_becomes_rejected_with_code() {
        let err = error_from_body(
            400,
            r#"{"error":{"type":"invalid_request_error","code":"resource_missing","message":"No such price"}}"#,
        );

        assert_eq!(err.kind, ProviderErrorKind::Rejected);
        assert_eq!(err.provider_code.as_deref(), Some("resource_missing"));
        assert_eq!(err.message, "No such price");
    }

    #[test]
    fn unparseable_server_error_is_unavailable() {
        let err = error_from_body(502, "<html>bad gateway</html>");

        assert_eq!(err.kind, ProviderErrorKind::Unavailable);
        assert!(err.message.contains("502"));
    }

    // ══════════════════════════════════════════════════════════════
    // HTTP behavior
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn create_product_sends_auth_and_idempotency_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/products")
            .match_header("authorization", "Bearer sk_test_123")
            .match_header("idempotency-key", "plan-pro-product")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("name".into(), "Pro".into()),
                Matcher::UrlEncoded("metadata[planId]".into(), "pro".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"prod_1","object":"product","name":"Pro","active":true}"#)
            .create_async()
            .await;

        let product = gateway(&server)
            .create_product(CreateProductRequest {
                plan_id: PlanId::new("pro").unwrap(),
                name: "Pro".into(),
                idempotency_key: "plan-pro-product".into(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(product.id, "prod_1");
    }

    #[tokio::test]
    async fn create_price_sends_recurring_interval() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/prices")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("product".into(), "prod_1".into()),
                Matcher::UrlEncoded("unit_amount".into(), "999".into()),
                Matcher::UrlEncoded("recurring[interval]".into(), "month".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"id":"price_1","product":"prod_1","unit_amount":999,"currency":"usd","recurring":{"interval":"month","interval_count":1},"active":true}"#,
            )
            .create_async()
            .await;

        let price = gateway(&server)
            .create_price(CreatePriceRequest {
                product_id: "prod_1".into(),
                plan_id: PlanId::new("pro").unwrap(),
                unit_amount: 999,
                currency: "usd".into(),
                interval: BillingInterval::Month,
                idempotency_key: "plan-pro-price-999-usd-month".into(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(price.unit_amount, Some(999));
        assert_eq!(price.interval.as_deref(), Some("month"));
    }

    #[tokio::test]
    async fn get_price_maps_404_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/prices/price_gone")
            .with_status(404)
            .with_body(r#"{"error":{"code":"resource_missing","message":"No such price"}}"#)
            .create_async()
            .await;

        let price = gateway(&server).get_price("price_gone").await.unwrap();

        assert!(price.is_none());
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/products/prod_1")
            .with_status(503)
            .with_body(r#"{"error":{"message":"Service unavailable"}}"#)
            .create_async()
            .await;

        let err = gateway(&server).get_product("prod_1").await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.status, Some(503));
    }

    #[tokio::test]
    async fn bad_request_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/subscriptions")
            .with_status(400)
            .with_body(r#"{"error":{"code":"resource_missing","message":"No such customer: 'cus_x'"}}"#)
            .create_async()
            .await;

        let err = gateway(&server)
            .create_subscription(CreateSubscriptionRequest::new(
                "cus_x",
                "price_1",
                UserId::new("u1").unwrap(),
                PlanId::new("pro").unwrap(),
            ))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.message.contains("No such customer"));
    }

    #[tokio::test]
    async fn customer_search_skips_deleted_customers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/customers")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("email".into(), "a@example.com".into()),
                Matcher::UrlEncoded("limit".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"object":"list","data":[{"id":"cus_old","email":"a@example.com","deleted":true}],"has_more":false}"#,
            )
            .create_async()
            .await;

        let found = gateway(&server)
            .find_customer_by_email("a@example.com")
            .await
            .unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let config = StripeConfig::new(SecretString::new("sk_test".to_string()))
            .with_base_url("http://127.0.0.1:9")
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));
        let gateway = StripeGateway::new(config).unwrap();

        let err = gateway.get_subscription("sub_1").await.unwrap_err();

        assert_eq!(err.kind, ProviderErrorKind::Unavailable);
    }
}
