//! PostgreSQL implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::Transaction;
use crate::domain::foundation::{DomainError, Timestamp, TransactionId, UserId};
use crate::ports::{SaveResult, TransactionRepository};

/// PostgreSQL implementation of the TransactionRepository port.
///
/// `source_ref` is unique; a second insert for the same payment is a no-op.
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    source_ref: String,
    user_id: Option<String>,
    customer_id: String,
    amount: i64,
    currency: String,
    status: String,
    subscription_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DomainError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let user_id = row
            .user_id
            .map(UserId::new)
            .transpose()
            .map_err(|e| DomainError::database("Invalid user id", e))?;

        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            source_ref: row.source_ref,
            user_id,
            customer_id: row.customer_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            subscription_id: row.subscription_id,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn record(&self, transaction: &Transaction) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, source_ref, user_id, customer_id, amount, currency, status,
                subscription_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_ref) DO NOTHING
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(&transaction.source_ref)
        .bind(transaction.user_id.as_ref().map(UserId::as_str))
        .bind(&transaction.customer_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(&transaction.status)
        .bind(&transaction.subscription_id)
        .bind(transaction.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to record transaction", e))?;

        Ok(if result.rows_affected() == 1 {
            SaveResult::Inserted
        } else {
            SaveResult::AlreadyExists
        })
    }

    async fn find_by_source_ref(
        &self,
        source_ref: &str,
    ) -> Result<Option<Transaction>, DomainError> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, source_ref, user_id, customer_id, amount, currency, status,
                   subscription_id, created_at
            FROM transactions
            WHERE source_ref = $1
            "#,
        )
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to load transaction", e))?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn list_by_customer(&self, customer_id: &str) -> Result<Vec<Transaction>, DomainError> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, source_ref, user_id, customer_id, amount, currency, status,
                   subscription_id, created_at
            FROM transactions
            WHERE customer_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to list transactions", e))?
        .into_iter()
        .map(Transaction::try_from)
        .collect()
    }

    async fn backfill_user_id(
        &self,
        customer_id: &str,
        user_id: &UserId,
    ) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE transactions SET user_id = $2 WHERE customer_id = $1 AND user_id IS NULL",
        )
        .bind(customer_id)
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to backfill transactions", e))?;

        Ok(result.rows_affected())
    }
}
