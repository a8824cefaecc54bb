//! Stripe payment provider adapter.
//!
//! Implements the `ProviderGateway` port for Stripe, including:
//! - Customer search and creation
//! - Product and price creation for the plan catalog
//! - Subscription creation, lookup and cancellation
//!
//! # Security
//!
//! - The API key is held in `secrecy::SecretString` and only exposed when
//!   building the `Authorization` header
//! - Webhook signature verification lives in the billing domain
//!   (`WebhookVerifier`) so it is shared by every delivery path
//!
//! # Configuration
//!
//! Required environment variables:
//! - `BILLING_SYNC__PAYMENT__STRIPE_API_KEY`: Stripe secret API key
//! - `BILLING_SYNC__PAYMENT__STRIPE_WEBHOOK_SECRET`: Webhook signing secret (whsec_...)

mod api_types;
mod mock_gateway;
mod stripe_adapter;

pub use mock_gateway::{MethodCall, MockProviderGateway};
pub use stripe_adapter::{StripeConfig, StripeGateway};
