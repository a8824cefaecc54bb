//! PostgreSQL implementation of the webhook dedup gate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::ports::{
    claim_superseded, ClaimOutcome, EventDisposition, EventState, ProviderEventRecord,
    ProviderEventStore,
};

/// Claims are a single `INSERT ... ON CONFLICT DO UPDATE` so two deliveries
/// of the same event cannot both win.
pub struct PostgresProviderEventStore {
    pool: PgPool,
}

impl PostgresProviderEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProviderEventRow {
    event_id: String,
    event_type: String,
    state: String,
    attempts: i32,
    last_error: Option<String>,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
    lease_expires_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

fn parse_state(s: &str) -> Result<EventState, DomainError> {
    EventState::parse(s).ok_or_else(|| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid provider event state: {}", s),
        )
    })
}

impl TryFrom<ProviderEventRow> for ProviderEventRecord {
    type Error = DomainError;

    fn try_from(row: ProviderEventRow) -> Result<Self, Self::Error> {
        Ok(ProviderEventRecord {
            event_id: row.event_id,
            event_type: row.event_type,
            state: parse_state(&row.state)?,
            attempts: row.attempts,
            last_error: row.last_error,
            payload: row.payload,
            received_at: Timestamp::from_datetime(row.received_at),
            lease_expires_at: Timestamp::from_datetime(row.lease_expires_at),
            processed_at: row.processed_at.map(Timestamp::from_datetime),
        })
    }
}

#[async_trait]
impl ProviderEventStore for PostgresProviderEventStore {
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        lease: Duration,
    ) -> Result<ClaimOutcome, DomainError> {
        // A failed record, or one whose lease ran out, is taken over.
        let claimed: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO provider_events (
                event_id, event_type, state, attempts, payload, received_at, lease_expires_at
            ) VALUES ($1, $2, 'processing', 1, $3, NOW(), NOW() + make_interval(secs => $4))
            ON CONFLICT (event_id) DO UPDATE SET
                state = 'processing',
                attempts = provider_events.attempts + 1,
                lease_expires_at = EXCLUDED.lease_expires_at
            WHERE provider_events.state = 'failed'
               OR (provider_events.state = 'processing' AND provider_events.lease_expires_at < NOW())
            RETURNING attempts
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to claim provider event", e))?;

        if let Some(attempts) = claimed {
            if attempts > 1 {
                tracing::info!(event_id, attempts, "Reclaimed provider event");
            }
            return Ok(ClaimOutcome::Claimed { attempt: attempts });
        }

        let state: String = sqlx::query_scalar("SELECT state FROM provider_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::database("Failed to read provider event state", e))?;

        if parse_state(&state)?.is_finished() {
            Ok(ClaimOutcome::AlreadyProcessed)
        } else {
            Ok(ClaimOutcome::InProgress)
        }
    }

    async fn complete(
        &self,
        event_id: &str,
        attempt: i32,
        disposition: EventDisposition,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE provider_events SET state = $2, last_error = $3, processed_at = NOW()
            WHERE event_id = $1 AND state = 'processing' AND attempts = $4
            "#,
        )
        .bind(event_id)
        .bind(disposition.state().as_str())
        .bind(disposition.reason())
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to complete provider event", e))?;

        if result.rows_affected() == 0 {
            return Err(claim_superseded(event_id, attempt));
        }
        Ok(())
    }

    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE provider_events SET state = 'failed', last_error = $2
            WHERE event_id = $1 AND state = 'processing' AND attempts = $3
            "#,
        )
        .bind(event_id)
        .bind(error)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to release provider event", e))?;

        if result.rows_affected() == 0 {
            return Err(claim_superseded(event_id, attempt));
        }
        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<ProviderEventRecord>, DomainError> {
        sqlx::query_as::<_, ProviderEventRow>(
            r#"
            SELECT event_id, event_type, state, attempts, last_error, payload,
                   received_at, lease_expires_at, processed_at
            FROM provider_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to load provider event", e))?
        .map(ProviderEventRecord::try_from)
        .transpose()
    }

    async fn delete_finished_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM provider_events
            WHERE state IN ('processed', 'ignored', 'rejected')
              AND COALESCE(processed_at, received_at) < $1
            "#,
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to purge provider events", e))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_to_record() {
        let record = ProviderEventRecord::try_from(ProviderEventRow {
            event_id: "evt_1".into(),
            event_type: "invoice.payment_succeeded".into(),
            state: "failed".into(),
            attempts: 2,
            last_error: Some("Database error: timeout".into()),
            payload: serde_json::json!({"id": "evt_1"}),
            received_at: Utc::now(),
            lease_expires_at: Utc::now(),
            processed_at: None,
        })
        .unwrap();

        assert_eq!(record.state, EventState::Failed);
        assert!(record.is_claimable(&Timestamp::now()));
    }

    #[test]
    fn unknown_state_is_a_database_error() {
        let err = parse_state("done").unwrap_err();

        assert_eq!(err.code, ErrorCode::DatabaseError);
    }
}
