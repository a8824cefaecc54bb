//! PostgreSQL implementation of UserRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::billing::{map_provider_status, BillingUser, LocalStatus, SubscriptionSnapshot};
use crate::domain::foundation::{DomainError, ErrorCode, PlanId, Timestamp, UserId};
use crate::ports::{ConditionalWrite, UserRepository};

const USER_COLUMNS: &str = r#"
    id, email, name, plan_id, provider_customer_id, provider_subscription_id,
    subscription_status, subscription_start_date, subscription_end_date,
    subscription_canceled_at, version
"#;

/// PostgreSQL implementation of the UserRepository port.
///
/// Provider ids are written with `... WHERE col IS NULL` so concurrent
/// writers cannot overwrite each other; full updates check `version`.
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &UserId) -> Result<Option<UserRow>, DomainError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::database("Failed to load user", e))
    }
}

/// Database row representation of a user.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    plan_id: String,
    provider_customer_id: Option<String>,
    provider_subscription_id: Option<String>,
    subscription_status: String,
    subscription_start_date: Option<DateTime<Utc>>,
    subscription_end_date: Option<DateTime<Utc>>,
    subscription_canceled_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<UserRow> for BillingUser {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let subscription_status = LocalStatus::parse(&row.subscription_status).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid subscription_status value: {}", row.subscription_status),
            )
        })?;

        Ok(BillingUser {
            id: UserId::new(row.id).map_err(|e| DomainError::database("Invalid user id", e))?,
            email: row.email,
            name: row.name,
            plan_id: PlanId::new(row.plan_id)
                .map_err(|e| DomainError::database("Invalid plan id", e))?,
            provider_customer_id: row.provider_customer_id,
            provider_subscription_id: row.provider_subscription_id,
            subscription_status,
            subscription_start_date: row.subscription_start_date.map(Timestamp::from_datetime),
            subscription_end_date: row.subscription_end_date.map(Timestamp::from_datetime),
            subscription_canceled_at: row.subscription_canceled_at.map(Timestamp::from_datetime),
            version: row.version,
        })
    }
}

fn datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.map(|t| *t.as_datetime())
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn save(&self, user: &BillingUser) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, name, plan_id, provider_customer_id, provider_subscription_id,
                subscription_status, subscription_start_date, subscription_end_date,
                subscription_canceled_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.plan_id.as_str())
        .bind(&user.provider_customer_id)
        .bind(&user.provider_subscription_id)
        .bind(user.subscription_status.as_str())
        .bind(datetime(user.subscription_start_date))
        .bind(datetime(user.subscription_end_date))
        .bind(datetime(user.subscription_canceled_at))
        .bind(user.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_pkey") {
                    return DomainError::new(
                        ErrorCode::Conflict,
                        format!("User {} already exists", user.id),
                    );
                }
            }
            DomainError::database("Failed to save user", e)
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<BillingUser>, DomainError> {
        self.fetch(id).await?.map(BillingUser::try_from).transpose()
    }

    async fn find_by_provider_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingUser>, DomainError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE provider_customer_id = $1",
            USER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to load user by customer", e))?
        .map(BillingUser::try_from)
        .transpose()
    }

    async fn set_provider_customer_id_if_absent(
        &self,
        id: &UserId,
        customer_id: &str,
    ) -> Result<ConditionalWrite, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                provider_customer_id = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND provider_customer_id IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to set customer id", e))?;

        if result.rows_affected() == 1 {
            return Ok(ConditionalWrite::Applied);
        }

        let row = self.fetch(id).await?.ok_or_else(|| DomainError::user_not_found(id))?;
        match row.provider_customer_id {
            Some(existing) => Ok(ConditionalWrite::AlreadySet(existing)),
            None => Err(DomainError::concurrency_conflict("User", id)),
        }
    }

    async fn attach_subscription_if_absent(
        &self,
        id: &UserId,
        expected_plan: &PlanId,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ConditionalWrite, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                provider_subscription_id = $3,
                subscription_status = $4,
                subscription_start_date = $5,
                subscription_end_date = $6,
                subscription_canceled_at = NULL,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND plan_id = $2 AND provider_subscription_id IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(expected_plan.as_str())
        .bind(&snapshot.subscription_id)
        .bind(map_provider_status(&snapshot.status).as_str())
        .bind(datetime(snapshot.current_period_start))
        .bind(datetime(snapshot.current_period_end))
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to attach subscription", e))?;

        if result.rows_affected() == 1 {
            return Ok(ConditionalWrite::Applied);
        }

        let row = self.fetch(id).await?.ok_or_else(|| DomainError::user_not_found(id))?;
        match row.provider_subscription_id {
            Some(existing) => Ok(ConditionalWrite::AlreadySet(existing)),
            None => Err(DomainError::concurrency_conflict("User", id)),
        }
    }

    async fn update(&self, user: &BillingUser) -> Result<BillingUser, DomainError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                email = $3,
                name = $4,
                plan_id = $5,
                provider_customer_id = $6,
                provider_subscription_id = $7,
                subscription_status = $8,
                subscription_start_date = $9,
                subscription_end_date = $10,
                subscription_canceled_at = $11,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id.as_str())
        .bind(user.version)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.plan_id.as_str())
        .bind(&user.provider_customer_id)
        .bind(&user.provider_subscription_id)
        .bind(user.subscription_status.as_str())
        .bind(datetime(user.subscription_start_date))
        .bind(datetime(user.subscription_end_date))
        .bind(datetime(user.subscription_canceled_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to update user", e))?;

        match row {
            Some(row) => BillingUser::try_from(row),
            None if self.fetch(&user.id).await?.is_some() => {
                Err(DomainError::concurrency_conflict("User", &user.id))
            }
            None => Err(DomainError::user_not_found(&user.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> UserRow {
        UserRow {
            id: "u1".into(),
            email: "u1@example.com".into(),
            name: None,
            plan_id: "pro".into(),
            provider_customer_id: Some("cus_1".into()),
            provider_subscription_id: Some("sub_1".into()),
            subscription_status: status.into(),
            subscription_start_date: None,
            subscription_end_date: Some(Utc::now()),
            subscription_canceled_at: None,
            version: 3,
        }
    }

    #[test]
    fn row_converts_to_user() {
        let user = BillingUser::try_from(row("canceled")).unwrap();

        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(user.subscription_status, LocalStatus::Canceled);
        assert_eq!(user.provider_subscription_id.as_deref(), Some("sub_1"));
        assert!(user.subscription_end_date.is_some());
        assert_eq!(user.version, 3);
    }

    #[test]
    fn unknown_status_is_a_database_error() {
        let err = BillingUser::try_from(row("paused")).unwrap_err();

        assert_eq!(err.code, ErrorCode::DatabaseError);
    }
}
