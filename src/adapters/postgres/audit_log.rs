//! PostgreSQL audit log backed by `system_logs`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::AuditLogEntry;
use crate::domain::foundation::DomainError;
use crate::ports::AuditLog;

/// Append-only audit log.
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO system_logs (id, actor_id, action, object_type, object_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.object_type.as_str())
        .bind(&entry.object_id)
        .bind(&entry.details)
        .bind(entry.timestamp.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database("Failed to append audit entry", e))?;

        Ok(())
    }
}
