//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `billing` - Plans, user billing state, provider events and sync rules

pub mod billing;
pub mod foundation;
