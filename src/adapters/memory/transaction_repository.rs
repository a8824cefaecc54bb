//! In-memory transaction store keyed by `source_ref`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::Transaction;
use crate::domain::foundation::{DomainError, UserId};
use crate::ports::{SaveResult, TransactionRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionRepository {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.transactions.read().await.len()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn record(&self, transaction: &Transaction) -> Result<SaveResult, DomainError> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.source_ref) {
            return Ok(SaveResult::AlreadyExists);
        }
        transactions.insert(transaction.source_ref.clone(), transaction.clone());
        Ok(SaveResult::Inserted)
    }

    async fn find_by_source_ref(
        &self,
        source_ref: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        Ok(self.transactions.read().await.get(source_ref).cloned())
    }

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Transaction>, DomainError> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<_> = transactions
            .values()
            .filter(|t| t.customer_id == customer_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn backfill_user_id(
        &self,
        customer_id: &str,
        user_id: &UserId,
    ) -> Result<u64, DomainError> {
        let mut transactions = self.transactions.write().await;
        let mut updated = 0;
        for tx in transactions
            .values_mut()
            .filter(|t| t.customer_id == customer_id && t.user_id.is_none())
        {
            tx.user_id = Some(user_id.clone());
            updated += 1;
        }
        Ok(updated)
    }
}
