//! ProviderEventStore port - Dedup gate for provider webhook deliveries.
//!
//! The provider delivers each event at least once and may redeliver it
//! concurrently. Before any side effect runs, the processor claims the event
//! id here. Only one claim wins; the winner later marks the event finished or
//! releases it so a redelivery can try again.
//!
//! ## Record lifecycle
//!
//! ```text
//! (absent) --claim--> processing --complete--> processed | ignored | rejected
//!                          |
//!                          +--release--> failed --claim--> processing
//! ```
//!
//! A `processing` record whose lease has expired can be claimed again, so a
//! crashed worker does not block the event forever. Every claim carries its
//! attempt number; `complete` and `release` only act on the claim that is
//! still current, so a worker that overran its lease cannot finish an event
//! another worker has taken over.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::foundation::{DomainError, Timestamp};

/// Persistent state of a claimed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Processing,
    Processed,
    Ignored,
    Rejected,
    Failed,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Processing => "processing",
            EventState::Processed => "processed",
            EventState::Ignored => "ignored",
            EventState::Rejected => "rejected",
            EventState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(EventState::Processing),
            "processed" => Some(EventState::Processed),
            "ignored" => Some(EventState::Ignored),
            "rejected" => Some(EventState::Rejected),
            "failed" => Some(EventState::Failed),
            _ => None,
        }
    }

    /// Finished states are never claimed again.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            EventState::Processed | EventState::Ignored | EventState::Rejected
        )
    }
}

/// Stored record of a provider event.
#[derive(Debug, Clone)]
pub struct ProviderEventRecord {
    /// Provider event id (evt_xxx format).
    pub event_id: String,
    pub event_type: String,
    pub state: EventState,
    /// Number of claims taken on this event.
    pub attempts: i32,
    /// Failure or ignore reason from the latest attempt.
    pub last_error: Option<String>,
    /// Original event payload for debugging.
    pub payload: serde_json::Value,
    pub received_at: Timestamp,
    pub lease_expires_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl ProviderEventRecord {
    /// Creates a freshly claimed record.
    pub fn claimed(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        lease: Duration,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            state: EventState::Processing,
            attempts: 1,
            last_error: None,
            payload,
            received_at: now,
            lease_expires_at: now.plus_secs(lease.as_secs() as i64),
            processed_at: None,
        }
    }

    /// True when another worker may take over this record.
    pub fn is_claimable(&self, now: &Timestamp) -> bool {
        match self.state {
            EventState::Failed => true,
            EventState::Processing => self.lease_expires_at.is_before(now),
            _ => false,
        }
    }
}

/// Result of trying to claim an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the event and must complete or release it with
    /// this attempt number.
    Claimed { attempt: i32 },
    /// The event reached a finished state earlier.
    AlreadyProcessed,
    /// Another worker holds a live claim.
    InProgress,
}

/// How a claimed event finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    Processed,
    Ignored(String),
    Rejected(String),
}

impl EventDisposition {
    pub fn state(&self) -> EventState {
        match self {
            EventDisposition::Processed => EventState::Processed,
            EventDisposition::Ignored(_) => EventState::Ignored,
            EventDisposition::Rejected(_) => EventState::Rejected,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EventDisposition::Processed => None,
            EventDisposition::Ignored(reason) | EventDisposition::Rejected(reason) => Some(reason),
        }
    }
}

/// Error for a `complete` or `release` whose claim has been superseded.
pub fn claim_superseded(event_id: &str, attempt: i32) -> DomainError {
    DomainError::concurrency_conflict("Provider event", event_id)
        .with_detail("attempt", attempt.to_string())
}

/// Port for the event dedup gate.
///
/// Implementations must make `claim` atomic: of any number of concurrent
/// claims for the same id, at most one returns `Claimed`.
#[async_trait]
pub trait ProviderEventStore: Send + Sync {
    /// Attempts to claim an event for processing.
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        lease: Duration,
    ) -> Result<ClaimOutcome, DomainError>;

    /// Marks a claimed event finished.
    ///
    /// Fails with a concurrency conflict when `attempt` is no longer the
    /// live claim on the event.
    async fn complete(
        &self,
        event_id: &str,
        attempt: i32,
        disposition: EventDisposition,
    ) -> Result<(), DomainError>;

    /// Gives a claimed event back after a retryable failure.
    ///
    /// Same claim check as `complete`.
    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), DomainError>;

    async fn find(&self, event_id: &str) -> Result<Option<ProviderEventRecord>, DomainError>;

    /// Deletes finished records received before `cutoff`.
    ///
    /// Returns the number of records deleted.
    async fn delete_finished_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
