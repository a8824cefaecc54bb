//! Webhook processor - Orchestrates idempotent provider event handling.
//!
//! ## Design
//!
//! The processor follows these steps:
//! 1. Claim the event id in the dedup gate before any side effect
//! 2. Dispatch the event to the billing handlers
//! 3. Record how the event finished, or release the claim on a retryable failure
//!
//! ## Race Condition Handling
//!
//! When multiple deliveries of one event arrive simultaneously only one claim
//! succeeds. The others see `InProgress` (answered with 409 so the provider
//! redelivers later) or `AlreadyProcessed` once the winner has finished.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::provider_event::ProviderEvent;
use super::webhook_errors::WebhookError;
use crate::ports::{ClaimOutcome, EventDisposition, ProviderEventStore};

/// Default claim lease; a crashed worker's claim expires after this.
pub const DEFAULT_EVENT_LEASE: Duration = Duration::from_secs(120);

/// Routes a claimed event to the code that applies it.
///
/// Returns `Err(WebhookError::Ignored(_))` for events that should be
/// acknowledged without effect.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn dispatch(&self, event: &ProviderEvent) -> Result<(), WebhookError>;
}

/// Result of webhook processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResult {
    /// Event was applied.
    Processed,
    /// Event was already finished by an earlier delivery.
    AlreadyProcessed,
    /// Event type or content needs no action.
    Ignored(String),
    /// Event can never be applied; acknowledged so redelivery stops.
    Rejected(String),
}

/// Processes provider events with exactly-once side effects per event id.
pub struct IdempotentWebhookProcessor {
    store: Arc<dyn ProviderEventStore>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    lease: Duration,
}

impl IdempotentWebhookProcessor {
    pub fn new(store: Arc<dyn ProviderEventStore>, dispatcher: Arc<dyn WebhookDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            lease: DEFAULT_EVENT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Process a provider event at most once to completion.
    ///
    /// # Returns
    ///
    /// - `Ok(Processed | Ignored | Rejected)` - This call finished the event
    /// - `Ok(AlreadyProcessed)` - An earlier delivery finished it
    /// - `Err(InProgress)` - Another worker holds the claim
    /// - `Err(_)` retryable - Claim released; the provider should redeliver
    pub async fn process(&self, event: &ProviderEvent) -> Result<WebhookResult, WebhookError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| WebhookError::ParseError(format!("Failed to serialize event: {}", e)))?;

        let attempt = match self
            .store
            .claim(&event.id, &event.event_type, &payload, self.lease)
            .await?
        {
            ClaimOutcome::Claimed { attempt } => attempt,
            ClaimOutcome::AlreadyProcessed => {
                tracing::debug!(event_id = %event.id, "Duplicate delivery of finished event");
                return Ok(WebhookResult::AlreadyProcessed);
            }
            ClaimOutcome::InProgress => {
                tracing::info!(event_id = %event.id, "Event is being processed by another worker");
                return Err(WebhookError::InProgress(event.id.clone()));
            }
        };

        match self.dispatcher.dispatch(event).await {
            Ok(()) => {
                self.finish(event, attempt, EventDisposition::Processed)
                    .await?;
                Ok(WebhookResult::Processed)
            }
            Err(WebhookError::Ignored(reason)) => {
                self.finish(event, attempt, EventDisposition::Ignored(reason.clone()))
                    .await?;
                Ok(WebhookResult::Ignored(reason))
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "Event processing failed, releasing for redelivery"
                );
                if let Err(release_err) = self
                    .store
                    .release(&event.id, attempt, &err.to_string())
                    .await
                {
                    tracing::error!(
                        event_id = %event.id,
                        attempt,
                        error = %release_err,
                        "Failed to release event claim"
                    );
                }
                Err(err)
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    reason = %reason,
                    "Event rejected"
                );
                self.finish(event, attempt, EventDisposition::Rejected(reason.clone()))
                    .await?;
                Ok(WebhookResult::Rejected(reason))
            }
        }
    }

    /// Records the outcome under our claim.
    ///
    /// If the lease ran out and another worker took the event over, that
    /// worker owns the outcome and this delivery is answered as in progress.
    async fn finish(
        &self,
        event: &ProviderEvent,
        attempt: i32,
        disposition: EventDisposition,
    ) -> Result<(), WebhookError> {
        match self.store.complete(&event.id, attempt, disposition).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_concurrency_conflict() => {
                tracing::warn!(
                    event_id = %event.id,
                    attempt,
                    "Claim was taken over while processing; leaving outcome to the new owner"
                );
                Err(WebhookError::InProgress(event.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryProviderEventStore;
    use crate::domain::billing::ProviderEventBuilder;
    use crate::ports::EventState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // ══════════════════════════════════════════════════════════════
    // Test Infrastructure
    // ══════════════════════════════════════════════════════════════

    /// Dispatcher that replays scripted results and counts calls.
    struct ScriptedDispatcher {
        calls: AtomicU32,
        script: Mutex<Vec<Result<(), WebhookError>>>,
    }

    impl ScriptedDispatcher {
        fn succeeding() -> Self {
            Self::with_script(vec![])
        }

        /// Results are consumed front to back; `Ok(())` once exhausted.
        fn with_script(script: Vec<Result<(), WebhookError>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WebhookDispatcher for ScriptedDispatcher {
        async fn dispatch(&self, _event: &ProviderEvent) -> Result<(), WebhookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }

    fn processor(
        dispatcher: Arc<ScriptedDispatcher>,
    ) -> (IdempotentWebhookProcessor, Arc<InMemoryProviderEventStore>) {
        let store = Arc::new(InMemoryProviderEventStore::new());
        let processor = IdempotentWebhookProcessor::new(store.clone(), dispatcher);
        (processor, store)
    }

    fn test_event(id: &str) -> ProviderEvent {
        ProviderEventBuilder::new()
            .id(id)
            .event_type("checkout.session.completed")
            .build()
    }

    async fn state_of(store: &InMemoryProviderEventStore, id: &str) -> EventState {
        store.find(id).await.unwrap().unwrap().state
    }

    // ══════════════════════════════════════════════════════════════
    // Happy path
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn processes_new_event_once() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, store) = processor(dispatcher.clone());

        let result = processor.process(&test_event("evt_new")).await;

        assert_eq!(result.unwrap(), WebhookResult::Processed);
        assert_eq!(dispatcher.call_count(), 1);
        assert_eq!(state_of(&store, "evt_new").await, EventState::Processed);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_skipped() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, _) = processor(dispatcher.clone());

        processor.process(&test_event("evt_dup")).await.unwrap();
        let result = processor.process(&test_event("evt_dup")).await;

        assert_eq!(result.unwrap(), WebhookResult::AlreadyProcessed);
        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn different_events_are_independent() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, _) = processor(dispatcher.clone());

        processor.process(&test_event("evt_1")).await.unwrap();
        processor.process(&test_event("evt_2")).await.unwrap();

        assert_eq!(dispatcher.call_count(), 2);
    }

    // ══════════════════════════════════════════════════════════════
    // Failure handling
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn ignored_event_is_finished() {
        let dispatcher = Arc::new(ScriptedDispatcher::with_script(vec![Err(
            WebhookError::Ignored("unsupported".into()),
        )]));
        let (processor, store) = processor(dispatcher.clone());

        let result = processor.process(&test_event("evt_ignore")).await.unwrap();
        let again = processor.process(&test_event("evt_ignore")).await.unwrap();

        assert_eq!(result, WebhookResult::Ignored("unsupported".into()));
        assert_eq!(again, WebhookResult::AlreadyProcessed);
        assert_eq!(state_of(&store, "evt_ignore").await, EventState::Ignored);
    }

    #[tokio::test]
    async fn retryable_failure_releases_claim_for_redelivery() {
        let dispatcher = Arc::new(ScriptedDispatcher::with_script(vec![Err(
            WebhookError::Database("connection reset".into()),
        )]));
        let (processor, store) = processor(dispatcher.clone());

        let first = processor.process(&test_event("evt_retry")).await;
        assert!(matches!(first, Err(WebhookError::Database(_))));
        assert_eq!(state_of(&store, "evt_retry").await, EventState::Failed);

        let second = processor.process(&test_event("evt_retry")).await;
        assert_eq!(second.unwrap(), WebhookResult::Processed);
        assert_eq!(dispatcher.call_count(), 2);

        let record = store.find("evt_retry").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn terminal_failure_is_acknowledged_and_not_retried() {
        let dispatcher = Arc::new(ScriptedDispatcher::with_script(vec![Err(
            WebhookError::MissingMetadata("userId"),
        )]));
        let (processor, store) = processor(dispatcher.clone());

        let result = processor.process(&test_event("evt_bad")).await.unwrap();
        let again = processor.process(&test_event("evt_bad")).await.unwrap();

        assert!(matches!(result, WebhookResult::Rejected(reason) if reason.contains("userId")));
        assert_eq!(again, WebhookResult::AlreadyProcessed);
        assert_eq!(dispatcher.call_count(), 1);
        assert_eq!(state_of(&store, "evt_bad").await, EventState::Rejected);
    }

    #[tokio::test]
    async fn live_claim_blocks_concurrent_delivery() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, store) = processor(dispatcher.clone());
        store
            .claim("evt_busy", "x", &serde_json::json!({}), Duration::from_secs(60))
            .await
            .unwrap();

        let result = processor.process(&test_event("evt_busy")).await;

        assert!(matches!(result, Err(WebhookError::InProgress(_))));
        assert_eq!(dispatcher.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_claim_is_taken_over() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, store) = processor(dispatcher.clone());
        store
            .claim("evt_stale", "x", &serde_json::json!({}), Duration::ZERO)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = processor.process(&test_event("evt_stale")).await;

        assert_eq!(result.unwrap(), WebhookResult::Processed);
    }

    /// Dispatcher that outlives its lease while a second worker reclaims.
    struct OverrunDispatcher {
        store: Arc<InMemoryProviderEventStore>,
    }

    #[async_trait]
    impl WebhookDispatcher for OverrunDispatcher {
        async fn dispatch(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let outcome = self
                .store
                .claim(&event.id, &event.event_type, &serde_json::json!({}), Duration::from_secs(60))
                .await
                .unwrap();
            assert_eq!(outcome, ClaimOutcome::Claimed { attempt: 2 });
            Ok(())
        }
    }

    #[tokio::test]
    async fn overrun_claim_does_not_finish_the_event() {
        let store = Arc::new(InMemoryProviderEventStore::new());
        let dispatcher = Arc::new(OverrunDispatcher {
            store: store.clone(),
        });
        let processor =
            IdempotentWebhookProcessor::new(store.clone(), dispatcher).with_lease(Duration::ZERO);

        let result = processor.process(&test_event("evt_slow")).await;

        assert!(matches!(result, Err(WebhookError::InProgress(_))));
        let record = store.find("evt_slow").await.unwrap().unwrap();
        assert_eq!(record.state, EventState::Processing);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn concurrent_deliveries_apply_once() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let (processor, _) = processor(dispatcher.clone());
        let processor = Arc::new(processor);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let processor = processor.clone();
                tokio::spawn(async move { processor.process(&test_event("evt_race")).await })
            })
            .collect();
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        assert_eq!(dispatcher.call_count(), 1);
    }
}
