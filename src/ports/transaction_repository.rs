//! Transaction repository port - append-only payment records.

use async_trait::async_trait;

use crate::domain::billing::Transaction;
use crate::domain::foundation::{DomainError, UserId};

/// Result of attempting to record a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted (first time seeing this payment).
    Inserted,
    /// A record with the same `source_ref` exists.
    AlreadyExists,
}

/// Port for storing payment transactions.
///
/// Implementations must enforce uniqueness of `source_ref` atomically
/// (unique constraint with `ON CONFLICT DO NOTHING` semantics).
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn record(&self, transaction: &Transaction) -> Result<SaveResult, DomainError>;

    async fn find_by_source_ref(&self, source_ref: &str)
        -> Result<Option<Transaction>, DomainError>;

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Transaction>, DomainError>;

    /// Fills in `user_id` on this customer's transactions that lack one.
    ///
    /// Returns the number of records updated.
    async fn backfill_user_id(&self, customer_id: &str, user_id: &UserId)
        -> Result<u64, DomainError>;
}
