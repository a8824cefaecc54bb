//! Audit log port - append-only sink for billing state changes.

use async_trait::async_trait;

use crate::domain::billing::AuditLogEntry;
use crate::domain::foundation::DomainError;

/// Append-only audit sink.
///
/// The engine never reads entries back; no coordination between writers
/// is required.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError>;
}
