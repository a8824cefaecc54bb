//! Event processing configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Settings for the provider event dedup gate.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Finished dedup records older than this are purged
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u32,

    /// How long a claim is held before another delivery may take it over
    #[serde(default = "default_event_lease_secs")]
    pub event_lease_secs: u64,

    /// Interval between purge runs in the server binary
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl SyncConfig {
    pub fn event_lease(&self) -> Duration {
        Duration::from_secs(self.event_lease_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_retention_days == 0 {
            return Err(ValidationError::InvalidRetention);
        }
        if !(1..=3600).contains(&self.event_lease_secs) {
            return Err(ValidationError::InvalidEventLease);
        }
        if self.purge_interval_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_retention_days: default_event_retention_days(),
            event_lease_secs: default_event_lease_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_event_retention_days() -> u32 {
    30
}

fn default_event_lease_secs() -> u64 {
    120
}

fn default_purge_interval_secs() -> u64 {
    86_400
}
