//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing domain to external systems:
//! - `memory` - In-memory stores for tests and local runs
//! - `postgres` - PostgreSQL persistence
//! - `stripe` - Stripe provider gateway
//! - `http` - Axum admin and webhook API

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;
