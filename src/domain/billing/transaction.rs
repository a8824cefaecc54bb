//! Append-only payment transaction records.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, TransactionId, UserId};

/// A payment observed from the provider.
///
/// `source_ref` identifies the underlying payment (invoice id when known,
/// otherwise payment intent id, otherwise the originating object id) and is
/// unique, so the same payment reported by several events is stored once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub source_ref: String,
    /// Filled in once the provider customer resolves to a local user.
    pub user_id: Option<UserId>,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub subscription_id: Option<String>,
    pub created_at: Timestamp,
}

impl Transaction {
    pub fn new(
        source_ref: impl Into<String>,
        customer_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            source_ref: source_ref.into(),
            user_id: None,
            customer_id: customer_id.into(),
            amount,
            currency: currency.into().to_ascii_lowercase(),
            status: status.into(),
            subscription_id: None,
            created_at: Timestamp::now(),
        }
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_subscription(mut self, subscription_id: Option<String>) -> Self {
        self.subscription_id = subscription_id;
        self
    }
}

/// Picks the deduplication reference for a payment.
pub fn payment_source_ref(
    invoice_id: Option<&str>,
    payment_intent_id: Option<&str>,
    object_id: &str,
) -> String {
    invoice_id
        .or(payment_intent_id)
        .unwrap_or(object_id)
        .to_string()
}
