//! PurgeProviderEventsHandler - Drops finished dedup records past retention.

use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::domain::foundation::Timestamp;
use crate::ports::ProviderEventStore;

/// Command to purge finished provider events.
#[derive(Debug, Clone)]
pub struct PurgeProviderEventsCommand {
    /// Records finished more than this many days ago are deleted.
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeProviderEventsResult {
    pub deleted: u64,
    pub cutoff: Timestamp,
}

/// Handler for dedup record retention.
///
/// Only processed, ignored and rejected records are removed. Records still
/// processing or awaiting redelivery are kept whatever their age, so the
/// gate never forgets an event that has not finished.
pub struct PurgeProviderEventsHandler {
    store: Arc<dyn ProviderEventStore>,
}

impl PurgeProviderEventsHandler {
    pub fn new(store: Arc<dyn ProviderEventStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: PurgeProviderEventsCommand,
    ) -> Result<PurgeProviderEventsResult, BillingError> {
        if cmd.retention_days == 0 {
            return Err(BillingError::Validation(
                "retention_days must be at least 1".to_string(),
            ));
        }

        let cutoff = Timestamp::now().minus_days(i64::from(cmd.retention_days));
        let deleted = self.store.delete_finished_before(cutoff).await?;

        tracing::info!(
            deleted,
            retention_days = cmd.retention_days,
            "Purged finished provider events"
        );

        Ok(PurgeProviderEventsResult { deleted, cutoff })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryProviderEventStore;
    use crate::ports::{EventDisposition, EventState};
    use std::time::Duration;

    async fn seeded_store() -> InMemoryProviderEventStore {
        let store = InMemoryProviderEventStore::new();
        let lease = Duration::from_secs(60);
        for id in ["evt_done", "evt_pending"] {
            store
                .claim(id, "invoice.payment_succeeded", &serde_json::json!({}), lease)
                .await
                .unwrap();
        }
        store
            .complete("evt_done", 1, EventDisposition::Processed)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn recent_records_survive() {
        let store = seeded_store().await;
        let handler = PurgeProviderEventsHandler::new(Arc::new(store.clone()));

        let result = handler
            .handle(PurgeProviderEventsCommand { retention_days: 30 })
            .await
            .unwrap();

        assert_eq!(result.deleted, 0);
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn old_finished_records_are_deleted_and_unfinished_kept() {
        let store = seeded_store().await;

        // Everything finished before tomorrow goes.
        let deleted = store
            .delete_finished_before(Timestamp::now().plus_secs(86_400))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.find("evt_done").await.unwrap().is_none());
        let pending = store.find("evt_pending").await.unwrap().unwrap();
        assert_eq!(pending.state, EventState::Processing);
    }

    #[tokio::test]
    async fn zero_retention_is_refused() {
        let handler = PurgeProviderEventsHandler::new(Arc::new(InMemoryProviderEventStore::new()));

        let err = handler
            .handle(PurgeProviderEventsCommand { retention_days: 0 })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
    }
}
