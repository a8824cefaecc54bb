//! In-memory provider event dedup gate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::ports::{
    claim_superseded, ClaimOutcome, EventDisposition, EventState, ProviderEventRecord,
    ProviderEventStore,
};

#[derive(Debug, Clone, Default)]
pub struct InMemoryProviderEventStore {
    records: Arc<RwLock<HashMap<String, ProviderEventRecord>>>,
}

impl InMemoryProviderEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn unclaimed(event_id: &str) -> DomainError {
    DomainError::new(
        ErrorCode::NotFound,
        format!("Provider event {} has no claim", event_id),
    )
}

fn holds_claim(record: &ProviderEventRecord, attempt: i32) -> bool {
    record.state == EventState::Processing && record.attempts == attempt
}

#[async_trait]
impl ProviderEventStore for InMemoryProviderEventStore {
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        lease: Duration,
    ) -> Result<ClaimOutcome, DomainError> {
        let mut records = self.records.write().await;
        let now = Timestamp::now();

        match records.get_mut(event_id) {
            None => {
                let record =
                    ProviderEventRecord::claimed(event_id, event_type, payload.clone(), lease);
                let attempt = record.attempts;
                records.insert(event_id.to_string(), record);
                Ok(ClaimOutcome::Claimed { attempt })
            }
            Some(record) if record.state.is_finished() => Ok(ClaimOutcome::AlreadyProcessed),
            Some(record) if record.is_claimable(&now) => {
                record.state = EventState::Processing;
                record.attempts += 1;
                record.last_error = None;
                record.lease_expires_at = now.plus_secs(lease.as_secs() as i64);
                Ok(ClaimOutcome::Claimed {
                    attempt: record.attempts,
                })
            }
            Some(_) => Ok(ClaimOutcome::InProgress),
        }
    }

    async fn complete(
        &self,
        event_id: &str,
        attempt: i32,
        disposition: EventDisposition,
    ) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(event_id)
            .ok_or_else(|| unclaimed(event_id))?;
        if !holds_claim(record, attempt) {
            return Err(claim_superseded(event_id, attempt));
        }
        record.state = disposition.state();
        record.last_error = disposition.reason().map(str::to_string);
        record.processed_at = Some(Timestamp::now());
        Ok(())
    }

    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(event_id)
            .ok_or_else(|| unclaimed(event_id))?;
        if !holds_claim(record, attempt) {
            return Err(claim_superseded(event_id, attempt));
        }
        record.state = EventState::Failed;
        record.last_error = Some(error.to_string());
        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<ProviderEventRecord>, DomainError> {
        Ok(self.records.read().await.get(event_id).cloned())
    }

    async fn delete_finished_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            let finished_at = r.processed_at.unwrap_or(r.received_at);
            !(r.state.is_finished() && finished_at.is_before(&cutoff))
        });
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn first_claim_wins() {
        let store = InMemoryProviderEventStore::new();
        let payload = serde_json::json!({});

        let first = store.claim("evt_1", "x", &payload, LEASE).await.unwrap();
        let second = store.claim("evt_1", "x", &payload, LEASE).await.unwrap();

        assert_eq!(first, ClaimOutcome::Claimed { attempt: 1 });
        assert_eq!(second, ClaimOutcome::InProgress);
    }

    #[tokio::test]
    async fn completed_event_reports_already_processed() {
        let store = InMemoryProviderEventStore::new();
        let payload = serde_json::json!({});
        store.claim("evt_1", "x", &payload, LEASE).await.unwrap();
        store
            .complete("evt_1", 1, EventDisposition::Rejected("bad metadata".into()))
            .await
            .unwrap();

        let again = store.claim("evt_1", "x", &payload, LEASE).await.unwrap();

        assert_eq!(again, ClaimOutcome::AlreadyProcessed);
        let record = store.find("evt_1").await.unwrap().unwrap();
        assert_eq!(record.state, EventState::Rejected);
        assert_eq!(record.last_error.as_deref(), Some("bad metadata"));
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn purge_keeps_unfinished_records() {
        let store = InMemoryProviderEventStore::new();
        let payload = serde_json::json!({});
        store.claim("evt_done", "x", &payload, LEASE).await.unwrap();
        store.complete("evt_done", 1, EventDisposition::Processed).await.unwrap();
        store.claim("evt_busy", "x", &payload, LEASE).await.unwrap();

        let deleted = store
            .delete_finished_before(Timestamp::now().plus_secs(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.find("evt_busy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completing_unknown_event_fails() {
        let store = InMemoryProviderEventStore::new();
        let err = store.complete("evt_x", 1, EventDisposition::Processed).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn overrun_worker_cannot_finish_a_reclaimed_event() {
        let store = InMemoryProviderEventStore::new();
        let payload = serde_json::json!({});
        let first = store.claim("evt_1", "x", &payload, Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.claim("evt_1", "x", &payload, LEASE).await.unwrap();
        assert_eq!(first, ClaimOutcome::Claimed { attempt: 1 });
        assert_eq!(second, ClaimOutcome::Claimed { attempt: 2 });

        let stale_complete = store
            .complete("evt_1", 1, EventDisposition::Processed)
            .await
            .unwrap_err();
        let stale_release = store.release("evt_1", 1, "timeout").await.unwrap_err();

        assert!(stale_complete.is_concurrency_conflict());
        assert!(stale_release.is_concurrency_conflict());
        let record = store.find("evt_1").await.unwrap().unwrap();
        assert_eq!(record.state, EventState::Processing);
        assert_eq!(record.attempts, 2);

        store.complete("evt_1", 2, EventDisposition::Processed).await.unwrap();
        assert_eq!(store.find("evt_1").await.unwrap().unwrap().state, EventState::Processed);
    }
}
