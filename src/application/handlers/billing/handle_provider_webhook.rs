//! HandleProviderWebhookHandler - Verifies and processes one webhook delivery.

use std::sync::Arc;

use crate::domain::billing::{IdempotentWebhookProcessor, WebhookError, WebhookResult, WebhookVerifier};

/// Command to handle a provider webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleProviderWebhookCommand {
    /// Raw request body, exactly as received.
    pub payload: Vec<u8>,
    /// `Stripe-Signature` header value.
    pub signature: String,
}

/// Outcome of a delivery that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleProviderWebhookResult {
    pub event_id: String,
    pub event_type: String,
    pub outcome: WebhookResult,
}

/// Handler for inbound provider webhooks.
///
/// Signature verification happens before anything is parsed or stored;
/// a delivery that fails it never reaches the dedup gate.
pub struct HandleProviderWebhookHandler {
    verifier: WebhookVerifier,
    processor: Arc<IdempotentWebhookProcessor>,
}

impl HandleProviderWebhookHandler {
    pub fn new(verifier: WebhookVerifier, processor: Arc<IdempotentWebhookProcessor>) -> Self {
        Self {
            verifier,
            processor,
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleProviderWebhookCommand,
    ) -> Result<HandleProviderWebhookResult, WebhookError> {
        // 1. Verify signature and parse
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, &cmd.signature)
            .map_err(|e| {
                tracing::warn!(error = %e, "Webhook delivery failed verification");
                e
            })?;

        // 2. Process behind the dedup gate
        match self.processor.process(&event).await {
            Ok(outcome) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    outcome = ?outcome,
                    "Webhook handled"
                );
                Ok(HandleProviderWebhookResult {
                    event_id: event.id,
                    event_type: event.event_type,
                    outcome,
                })
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    livemode = event.livemode,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Webhook processing failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::Harness;
    use crate::domain::billing::fixtures::free_plan;
    use crate::domain::billing::sign_payload;
    use secrecy::SecretString;

    const SECRET: &str = "whsec_test_secret";

    fn handler(h: &Harness) -> HandleProviderWebhookHandler {
        HandleProviderWebhookHandler::new(
            WebhookVerifier::new(SecretString::new(SECRET.to_string())),
            Arc::new(h.processor()),
        )
    }

    fn signed(payload: &str) -> HandleProviderWebhookCommand {
        let timestamp = chrono::Utc::now().timestamp();
        HandleProviderWebhookCommand {
            payload: payload.as_bytes().to_vec(),
            signature: sign_payload(SECRET, timestamp, payload.as_bytes()).unwrap(),
        }
    }

    fn unknown_event(id: &str) -> String {
        serde_json::json!({
            "id": id,
            "object": "event",
            "type": "customer.tax_id.created",
            "created": 1_704_067_200,
            "livemode": false,
            "data": {"object": {"id": "txi_1"}}
        })
        .to_string()
    }

    #[tokio::test]
    async fn verified_delivery_is_processed() {
        let h = Harness::new();
        h.seed_plan(&free_plan()).await;

        let result = handler(&h).handle(signed(&unknown_event("evt_1"))).await.unwrap();

        assert_eq!(result.event_id, "evt_1");
        assert!(matches!(result.outcome, WebhookResult::Ignored(_)));
        assert_eq!(h.events.count().await, 1);
    }

    #[tokio::test]
    async fn bad_signature_never_reaches_the_gate() {
        let h = Harness::new();
        let mut cmd = signed(&unknown_event("evt_1"));
        cmd.signature = format!("t={},v1={}", chrono::Utc::now().timestamp(), "00".repeat(32));

        let err = handler(&h).handle(cmd).await.unwrap_err();

        assert!(matches!(err, WebhookError::InvalidSignature));
        assert_eq!(h.events.count().await, 0);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let h = Harness::new();
        let mut cmd = signed(&unknown_event("evt_1"));
        cmd.payload = unknown_event("evt_2").into_bytes();

        let err = handler(&h).handle(cmd).await.unwrap_err();

        assert!(err.is_authentication_failure());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged() {
        let h = Harness::new();
        let payload = unknown_event("evt_1");
        handler(&h).handle(signed(&payload)).await.unwrap();

        let second = handler(&h).handle(signed(&payload)).await.unwrap();

        assert_eq!(second.outcome, WebhookResult::AlreadyProcessed);
    }
}
