//! User repository port (billing fields).
//!
//! Users are created by signup outside this engine; the sync engine reads
//! them and writes only billing fields.
//!
//! # Concurrency
//!
//! - Provider id fields are written with "set only if currently null"
//!   semantics so two concurrent provisioning runs cannot both link an id.
//! - Whole-record writes are version checked (optimistic locking).

use async_trait::async_trait;

use crate::domain::billing::{BillingUser, SubscriptionSnapshot};
use crate::domain::foundation::{DomainError, PlanId, UserId};

/// Result of a "set if absent" write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalWrite {
    /// The value was stored.
    Applied,
    /// Another writer stored a value first; carries the stored value.
    AlreadySet(String),
}

impl ConditionalWrite {
    /// The value that ended up stored.
    pub fn stored_value<'a>(&'a self, attempted: &'a str) -> &'a str {
        match self {
            ConditionalWrite::Applied => attempted,
            ConditionalWrite::AlreadySet(existing) => existing,
        }
    }
}

/// Repository port for user billing state.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user record.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the user id already exists
    async fn save(&self, user: &BillingUser) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &UserId) -> Result<Option<BillingUser>, DomainError>;

    async fn find_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingUser>, DomainError>;

    /// Stores the provider customer id unless one is already linked.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if the user does not exist
    async fn set_provider_customer_id_if_absent(
        &self,
        id: &UserId,
        customer_id: &str,
    ) -> Result<ConditionalWrite, DomainError>;

    /// Links a subscription unless one is already linked.
    ///
    /// Stores the subscription id, mapped status and provider period, and
    /// only applies while the user is still on `expected_plan`.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if the user does not exist
    /// - `ConcurrencyConflict` if the user moved to another plan meanwhile
    async fn attach_subscription_if_absent(
        &self,
        id: &UserId,
        expected_plan: &PlanId,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ConditionalWrite, DomainError>;

    /// Writes all billing fields if `user.version` is still current.
    ///
    /// Returns the stored user with its new version.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if the user does not exist
    /// - `ConcurrencyConflict` if the stored version differs
    async fn update(&self, user: &BillingUser) -> Result<BillingUser, DomainError>;
}
