//! PostgreSQL implementation of PlanRepository.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::{BillingInterval, Plan};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId};
use crate::ports::{ConditionalWrite, PlanRepository};

const PLAN_COLUMNS: &str = r#"
    id, name, price, currency, billing_interval, is_free, level,
    provider_product_id, provider_price_id
"#;

/// PostgreSQL implementation of the PlanRepository port.
pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, column: &str, value: &str) -> Result<Option<Plan>, DomainError> {
        sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM plans WHERE {} = $1",
            PLAN_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to load plan", e))?
        .map(Plan::try_from)
        .transpose()
    }

    /// Writes `value` into `column` only while the column is NULL.
    async fn set_if_absent(
        &self,
        id: &PlanId,
        column: &str,
        value: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        let result = sqlx::query(&format!(
            "UPDATE plans SET {col} = $2, updated_at = NOW() WHERE id = $1 AND {col} IS NULL",
            col = column
        ))
        .bind(id.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to set provider id", e))?;

        if result.rows_affected() == 1 {
            return Ok(ConditionalWrite::Applied);
        }

        let existing: Option<Option<String>> =
            sqlx::query_scalar(&format!("SELECT {} FROM plans WHERE id = $1", column))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DomainError::database("Failed to read provider id", e))?;

        match existing {
            None => Err(DomainError::plan_not_found(id)),
            Some(Some(existing)) => Ok(ConditionalWrite::AlreadySet(existing)),
            Some(None) => Err(DomainError::concurrency_conflict("Plan", id)),
        }
    }
}

/// Database row representation of a plan.
#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    price: i64,
    currency: String,
    billing_interval: String,
    is_free: bool,
    level: i32,
    provider_product_id: Option<String>,
    provider_price_id: Option<String>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let interval = BillingInterval::parse(&row.billing_interval).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid billing_interval value: {}", row.billing_interval),
            )
        })?;

        Ok(Plan {
            id: PlanId::new(row.id).map_err(|e| DomainError::database("Invalid plan id", e))?,
            name: row.name,
            price: row.price,
            currency: row.currency,
            interval,
            is_free: row.is_free,
            level: row.level,
            provider_product_id: row.provider_product_id,
            provider_price_id: row.provider_price_id,
        })
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn save(&self, plan: &Plan) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO plans (
                id, name, price, currency, billing_interval, is_free, level,
                provider_product_id, provider_price_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(plan.id.as_str())
        .bind(&plan.name)
        .bind(plan.price)
        .bind(&plan.currency)
        .bind(plan.interval.as_str())
        .bind(plan.is_free)
        .bind(plan.level)
        .bind(&plan.provider_product_id)
        .bind(&plan.provider_price_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("plans_pkey") {
                    return DomainError::new(
                        ErrorCode::Conflict,
                        format!("Plan {} already exists", plan.id),
                    );
                }
            }
            DomainError::database("Failed to save plan", e)
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        self.fetch_where("id", id.as_str()).await
    }

    async fn find_by_provider_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, DomainError> {
        self.fetch_where("provider_product_id", product_id).await
    }

    async fn set_provider_product_id_if_absent(
        &self,
        id: &PlanId,
        product_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        self.set_if_absent(id, "provider_product_id", product_id).await
    }

    async fn set_provider_price_id_if_absent(
        &self,
        id: &PlanId,
        price_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        self.set_if_absent(id, "provider_price_id", price_id).await
    }

    async fn replace_provider_price_id(
        &self,
        id: &PlanId,
        expected: &str,
        price_id: &str,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE plans SET provider_price_id = $3, updated_at = NOW()
            WHERE id = $1 AND provider_price_id = $2
            "#,
        )
        .bind(id.as_str())
        .bind(expected)
        .bind(price_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to replace price id", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_terms(
        &self,
        id: &PlanId,
        price: i64,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE plans SET price = $2, currency = $3, billing_interval = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(price)
        .bind(currency)
        .bind(interval.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to update plan terms", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::plan_not_found(id));
        }
        Ok(())
    }
}
