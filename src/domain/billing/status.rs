//! Local subscription status and the provider status mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-state subscription status stored on the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    /// Subscription grants access (includes grace states such as past due).
    #[default]
    Active,
    /// Subscription was canceled by the customer or an administrator.
    Canceled,
    /// Subscription ended without payment ever completing or after it ran out.
    Expired,
}

impl LocalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalStatus::Active => "active",
            LocalStatus::Canceled => "canceled",
            LocalStatus::Expired => "expired",
        }
    }

    /// Parses a stored status value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LocalStatus::Active),
            "canceled" => Some(LocalStatus::Canceled),
            "expired" => Some(LocalStatus::Expired),
            _ => None,
        }
    }

    /// Canceled and expired subscriptions never come back to life upstream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LocalStatus::Canceled | LocalStatus::Expired)
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a provider subscription status string to the local model.
///
/// Total over all inputs. Unknown statuses, including `incomplete`, fail
/// open to `Active`.
pub fn map_provider_status(status: &str) -> LocalStatus {
    match status {
        "active" | "trialing" | "past_due" | "unpaid" => LocalStatus::Active,
        "canceled" => LocalStatus::Canceled,
        "incomplete_expired" | "ended" => LocalStatus::Expired,
        other => {
            if other != "incomplete" {
                tracing::debug!(status = other, "Unrecognized provider status mapped to active");
            }
            LocalStatus::Active
        }
    }
}
