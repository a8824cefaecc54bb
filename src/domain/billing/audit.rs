//! Audit log entries for admin- and system-triggered billing changes.
//!
//! Entries are append-only. Every state change made by an administrator
//! action or by provider event processing produces one entry naming who did
//! it, what was touched and a structured detail payload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{AuditEntryId, Timestamp};

/// Actor id recorded for changes driven by provider events.
pub const PROVIDER_ACTOR: &str = "payment-provider";

/// Actor id recorded for changes made by background jobs.
pub const SYSTEM_ACTOR: &str = "system";

/// Kinds of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PlanSynced,
    PlanPricingUpdated,
    CustomerProvisioned,
    PlanAssigned,
    CheckoutCompleted,
    SubscriptionSynced,
    SubscriptionCanceled,
    PaymentRecorded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PlanSynced => "PLAN_SYNCED",
            AuditAction::PlanPricingUpdated => "PLAN_PRICING_UPDATED",
            AuditAction::CustomerProvisioned => "CUSTOMER_PROVISIONED",
            AuditAction::PlanAssigned => "PLAN_ASSIGNED",
            AuditAction::CheckoutCompleted => "CHECKOUT_COMPLETED",
            AuditAction::SubscriptionSynced => "SUBSCRIPTION_SYNCED",
            AuditAction::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            AuditAction::PaymentRecorded => "PAYMENT_RECORDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            AuditAction::PlanSynced,
            AuditAction::PlanPricingUpdated,
            AuditAction::CustomerProvisioned,
            AuditAction::PlanAssigned,
            AuditAction::CheckoutCompleted,
            AuditAction::SubscriptionSynced,
            AuditAction::SubscriptionCanceled,
            AuditAction::PaymentRecorded,
        ]
        .into_iter()
        .find(|action| action.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of the record an entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditObjectType {
    User,
    Plan,
    Transaction,
}

impl AuditObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditObjectType::User => "user",
            AuditObjectType::Plan => "plan",
            AuditObjectType::Transaction => "transaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(AuditObjectType::User),
            "plan" => Some(AuditObjectType::Plan),
            "transaction" => Some(AuditObjectType::Transaction),
            _ => None,
        }
    }
}

/// One audit log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub actor_id: String,
    pub action: AuditAction,
    pub object_type: AuditObjectType,
    pub object_id: String,
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
}

impl AuditLogEntry {
    pub fn builder(
        action: AuditAction,
        object_type: AuditObjectType,
        object_id: impl fmt::Display,
    ) -> AuditLogEntryBuilder {
        AuditLogEntryBuilder::new(action, object_type, object_id.to_string())
    }
}

/// Builder for audit entries.
pub struct AuditLogEntryBuilder {
    action: AuditAction,
    object_type: AuditObjectType,
    object_id: String,
    actor_id: String,
    details: serde_json::Map<String, serde_json::Value>,
}

impl AuditLogEntryBuilder {
    fn new(action: AuditAction, object_type: AuditObjectType, object_id: String) -> Self {
        Self {
            action,
            object_type,
            object_id,
            actor_id: SYSTEM_ACTOR.to_string(),
            details: serde_json::Map::new(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn detail(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId::new(),
            actor_id: self.actor_id,
            action: self.action,
            object_type: self.object_type,
            object_id: self.object_id,
            details: serde_json::Value::Object(self.details),
            timestamp: Timestamp::now(),
        }
    }
}
