//! Provider webhook signature verification.
//!
//! Deliveries carry a `t=<unix>,v1=<hex>` header. The `v1` value is an
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint secret. During
//! secret rotation the provider sends several `v1` entries; any match passes.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::provider_event::ProviderEvent;
use super::webhook_errors::WebhookError;

/// Default maximum age for webhook deliveries (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for future timestamps (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components from the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// All v1 signatures (HMAC-SHA256) present in the header.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a signature header string.
    ///
    /// Format: `t=<timestamp>,v1=<signature>[,v1=<signature>...]`
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::ParseError` if the header format is invalid.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid header format".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::ParseError("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        WebhookError::ParseError("invalid v1 signature hex".to_string())
                    })?);
                }
                _ => {
                    // v0 and future schemes are not trusted
                }
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::ParseError("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifier for provider webhook deliveries.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
    require_livemode: bool,
}

impl WebhookVerifier {
    /// Creates a verifier with the default 5 minute tolerance.
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            require_livemode: false,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Rejects test-mode events when set.
    pub fn require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }

    /// Verifies the delivery signature and parses the event envelope.
    ///
    /// # Verification Steps
    ///
    /// 1. Parse the signature header
    /// 2. Validate timestamp is within the tolerance window
    /// 3. Compute expected signature using HMAC-SHA256
    /// 4. Compare against every v1 signature in constant time
    /// 5. Parse the JSON payload and check livemode
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` - No signature matched
    /// - `TimestampOutOfRange` - Delivery is older than the tolerance
    /// - `InvalidTimestamp` - Delivery timestamp is in the future
    /// - `ParseError` - Failed to parse header or JSON payload
    /// - `LivemodeMismatch` - Test event on a live-only endpoint
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        let header = SignatureHeader::parse(signature_header)?;

        self.validate_timestamp(header.timestamp)?;

        let expected = compute_signature(self.secret.expose_secret(), header.timestamp, payload)?;
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate));
        if !matched {
            return Err(WebhookError::InvalidSignature);
        }

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        if self.require_livemode && !event.livemode {
            return Err(WebhookError::LivemodeMismatch);
        }

        Ok(event)
    }

    /// Validates that the timestamp is within acceptable bounds.
    fn validate_timestamp(&self, timestamp: i64) -> Result<(), WebhookError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > self.tolerance_secs {
            return Err(WebhookError::TimestampOutOfRange);
        }

        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::InvalidTimestamp);
        }

        Ok(())
    }
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds a signature header value for `payload` signed at `timestamp`.
///
/// Used by test harnesses and local replay tooling.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::new(TEST_SECRET.to_string()))
    }

    fn event_payload(livemode: bool) -> String {
        serde_json::json!({
            "id": "evt_test123",
            "type": "checkout.session.completed",
            "created": 1704067200,
            "data": { "object": { "id": "cs_1" } },
            "livemode": livemode,
        })
        .to_string()
    }

    // ══════════════════════════════════════════════════════════════
    // SignatureHeader Parsing Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_header_with_v1_only() {
        let header_str = format!("t=1234567890,v1={}", "a".repeat(64));

        let header = SignatureHeader::parse(&header_str).unwrap();

        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 1);
        assert_eq!(header.v1_signatures[0].len(), 32);
    }

    #[test]
    fn parse_header_collects_rotated_signatures() {
        let header_str = format!("t=1,v1={},v1={}", "a".repeat(64), "b".repeat(64));

        let header = SignatureHeader::parse(&header_str).unwrap();

        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn parse_header_ignores_unknown_fields() {
        let header_str = format!("t=1234567890,v1={},v0={},scheme=hmac", "a".repeat(64), "b".repeat(64));

        let header = SignatureHeader::parse(&header_str).unwrap();

        assert_eq!(header.v1_signatures.len(), 1);
    }

    #[test]
    fn parse_header_missing_parts_fail() {
        for header_str in [
            format!("v1={}", "a".repeat(64)),
            "t=1234567890".to_string(),
            format!("t=not_a_number,v1={}", "a".repeat(64)),
            "t=1234567890,v1=not_valid_hex".to_string(),
            "t1234567890".to_string(),
        ] {
            let result = SignatureHeader::parse(&header_str);
            assert!(matches!(result, Err(WebhookError::ParseError(_))), "{}", header_str);
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn verify_valid_signature() {
        let payload = event_payload(false);
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload(TEST_SECRET, timestamp, payload.as_bytes()).unwrap();

        let event = verifier().verify_and_parse(payload.as_bytes(), &header).unwrap();

        assert_eq!(event.id, "evt_test123");
        assert_eq!(event.event_type, "checkout.session.completed");
    }

    #[test]
    fn verify_accepts_any_matching_rotated_signature() {
        let payload = event_payload(false);
        let timestamp = chrono::Utc::now().timestamp();
        let good = sign_payload(TEST_SECRET, timestamp, payload.as_bytes()).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", timestamp, "a".repeat(64), good_sig);

        assert!(verifier().verify_and_parse(payload.as_bytes(), &header).is_ok());
    }

    #[test]
    fn verify_wrong_secret_fails() {
        let payload = event_payload(false);
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload("wrong_secret", timestamp, payload.as_bytes()).unwrap();

        let result = verifier().verify_and_parse(payload.as_bytes(), &header);

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[test]
    fn verify_tampered_payload_fails() {
        let original = event_payload(false);
        let tampered = original.replace("evt_test123", "evt_hacked");
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload(TEST_SECRET, timestamp, original.as_bytes()).unwrap();

        let result = verifier().verify_and_parse(tampered.as_bytes(), &header);

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[test]
    fn verify_invalid_json_fails_after_signature() {
        let payload = "not valid json";
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload(TEST_SECRET, timestamp, payload.as_bytes()).unwrap();

        let result = verifier().verify_and_parse(payload.as_bytes(), &header);

        assert!(matches!(result, Err(WebhookError::ParseError(_))));
    }

    #[test]
    fn verify_rejects_test_events_when_live_required() {
        let payload = event_payload(false);
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload(TEST_SECRET, timestamp, payload.as_bytes()).unwrap();

        let result = verifier()
            .require_livemode(true)
            .verify_and_parse(payload.as_bytes(), &header);

        assert!(matches!(result, Err(WebhookError::LivemodeMismatch)));
    }

    // ══════════════════════════════════════════════════════════════
    // Timestamp Validation Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn timestamp_inside_window_succeeds() {
        let now = chrono::Utc::now().timestamp();
        assert!(verifier().validate_timestamp(now - 120).is_ok());
        assert!(verifier().validate_timestamp(now - 300).is_ok());
        assert!(verifier().validate_timestamp(now + 30).is_ok());
    }

    #[test]
    fn timestamp_too_old_fails() {
        let now = chrono::Utc::now().timestamp();
        let result = verifier().validate_timestamp(now - 301);
        assert!(matches!(result, Err(WebhookError::TimestampOutOfRange)));
    }

    #[test]
    fn timestamp_from_future_beyond_skew_fails() {
        let now = chrono::Utc::now().timestamp();
        let result = verifier().validate_timestamp(now + 120);
        assert!(matches!(result, Err(WebhookError::InvalidTimestamp)));
    }

    #[test]
    fn custom_tolerance_applies() {
        let now = chrono::Utc::now().timestamp();
        let strict = verifier().with_tolerance(30);
        assert!(matches!(
            strict.validate_timestamp(now - 60),
            Err(WebhookError::TimestampOutOfRange)
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Constant Time Comparison Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn constant_time_compare_behaves_like_equality() {
        assert!(constant_time_compare(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_compare(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_compare(&[1, 2, 3], &[1, 2, 3, 4]));
        assert!(constant_time_compare(&[], &[]));
    }
}
