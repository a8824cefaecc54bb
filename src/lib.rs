//! Billing Sync - Keeps local billing state consistent with a payment provider.
//!
//! The crate owns the plan catalog and the billing view of users, mirrors the
//! catalog into the provider (products and prices), provisions customers and
//! subscriptions, and applies provider webhooks exactly once per event.
//!
//! # Layout
//!
//! - `domain` - Plans, users, status mapping, webhook verification and dedup
//! - `ports` - Repository, audit, event store and provider gateway traits
//! - `adapters` - PostgreSQL, Stripe, in-memory and HTTP implementations
//! - `application` - Command and query handlers
//! - `config` - Environment-driven configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
