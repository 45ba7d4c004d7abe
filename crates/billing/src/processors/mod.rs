//! Payment processor adapters
//!
//! One adapter per external processor, behind the [`ProcessorAdapter`]
//! trait. The adapter for a subscription is selected once, from the
//! processor kind stored on the record, via [`ProcessorSet::for_kind`] -
//! never branched ad hoc per call.

mod card_on_file;
mod redirect_order;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult, ProcessorFailure};
use crate::models::ProcessorKind;

pub use card_on_file::CardOnFileProcessor;
pub use redirect_order::{OrderDetails, RedirectOrderProcessor};

/// Successful outcome of a capture on the processor side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// Processor-assigned payment/capture id. Unique per charge; the ledger
    /// enforces that uniqueness as the last line of idempotency defense.
    pub payment_ref: String,
    pub amount_cents: i64,
}

#[async_trait]
pub trait ProcessorAdapter: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    /// Validate that a stored payment source is usable, without moving money.
    async fn authorize(&self, customer_ref: &str, source_token: &str) -> BillingResult<()>;

    /// Capture `amount_cents` from `source_token`. The processor deduplicates
    /// by `idempotency_key`, so a retried call returns the same canonical
    /// result instead of charging twice.
    async fn capture(
        &self,
        amount_cents: i64,
        source_token: &str,
        idempotency_key: &str,
    ) -> Result<PaymentResult, ProcessorFailure>;

    /// Verify a webhook signature. Synchronous and called before any state
    /// mutation. `Ok(false)` means the signature did not match; `Err` means
    /// the verification key is not configured.
    fn verify_webhook_signature(&self, body: &str, header: &str) -> BillingResult<bool>;
}

/// The adapters configured for this deployment, one per processor kind.
#[derive(Clone)]
pub struct ProcessorSet {
    pub card_on_file: Arc<dyn ProcessorAdapter>,
    pub redirect_order: Arc<dyn ProcessorAdapter>,
}

impl ProcessorSet {
    pub fn for_kind(&self, kind: ProcessorKind) -> Arc<dyn ProcessorAdapter> {
        match kind {
            ProcessorKind::CardOnFile => Arc::clone(&self.card_on_file),
            ProcessorKind::RedirectOrder => Arc::clone(&self.redirect_order),
        }
    }
}

/// Webhook signature scheme shared by the processors: HMAC-SHA256 over
/// `notification_url + raw_body`, base64-encoded.
pub(crate) mod signature {
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use subtle::ConstantTimeEq;

    type HmacSha256 = Hmac<Sha256>;

    pub fn sign(key: &str, notification_url: &str, body: &str) -> String {
        // HMAC accepts keys of any length, so new_from_slice cannot fail.
        let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
            return String::new();
        };
        mac.update(notification_url.as_bytes());
        mac.update(body.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison of the computed signature against the header.
    pub fn verify(key: &str, notification_url: &str, body: &str, header: &str) -> bool {
        let computed = sign(key, notification_url, body);
        if computed.len() != header.len() {
            return false;
        }
        computed.as_bytes().ct_eq(header.as_bytes()).into()
    }
}

/// Scripted processor double for deterministic tests.
pub struct FakeProcessor {
    kind: ProcessorKind,
    notification_url: String,
    webhook_key: Option<String>,
    inner: std::sync::Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    /// Source tokens scripted to fail, with the failure to return.
    failures: std::collections::HashMap<String, ProcessorFailure>,
    /// Processor-side idempotency: canonical result per key.
    seen_keys: std::collections::HashMap<String, PaymentResult>,
    /// Every capture attempt that reached the processor.
    capture_calls: Vec<(String, String, i64)>,
    next_ref: u64,
}

impl FakeProcessor {
    pub fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            notification_url: "https://hooks.test/processor".to_string(),
            webhook_key: Some("test-webhook-key".to_string()),
            inner: std::sync::Mutex::new(FakeState::default()),
        }
    }

    pub fn without_webhook_key(kind: ProcessorKind) -> Self {
        Self {
            webhook_key: None,
            ..Self::new(kind)
        }
    }

    /// Script `source_token` to fail with `failure` on capture.
    pub fn fail_token(&self, source_token: &str, failure: ProcessorFailure) {
        if let Ok(mut state) = self.inner.lock() {
            state.failures.insert(source_token.to_string(), failure);
        }
    }

    /// Unscript every failure, e.g. after a card is topped up mid-test.
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.failures.clear();
        }
    }

    /// Number of capture calls that actually reached the processor.
    pub fn capture_call_count(&self) -> usize {
        self.inner.lock().map(|s| s.capture_calls.len()).unwrap_or(0)
    }

    /// Produce a header value that verifies against this fake's key.
    pub fn sign_webhook(&self, body: &str) -> String {
        let key = self.webhook_key.as_deref().unwrap_or("");
        signature::sign(key, &self.notification_url, body)
    }
}

#[async_trait]
impl ProcessorAdapter for FakeProcessor {
    fn kind(&self) -> ProcessorKind {
        self.kind
    }

    async fn authorize(&self, _customer_ref: &str, source_token: &str) -> BillingResult<()> {
        let state = self
            .inner
            .lock()
            .map_err(|_| BillingError::Configuration("fake processor poisoned".into()))?;
        match state.failures.get(source_token) {
            Some(failure) => Err(BillingError::Processor(failure.clone())),
            None => Ok(()),
        }
    }

    async fn capture(
        &self,
        amount_cents: i64,
        source_token: &str,
        idempotency_key: &str,
    ) -> Result<PaymentResult, ProcessorFailure> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| ProcessorFailure::Api("fake processor poisoned".into()))?;

        if let Some(existing) = state.seen_keys.get(idempotency_key) {
            return Ok(existing.clone());
        }

        state.capture_calls.push((
            source_token.to_string(),
            idempotency_key.to_string(),
            amount_cents,
        ));

        if let Some(failure) = state.failures.get(source_token) {
            return Err(failure.clone());
        }

        state.next_ref += 1;
        let result = PaymentResult {
            payment_ref: format!("pay_{:08x}", state.next_ref),
            amount_cents,
        };
        state
            .seen_keys
            .insert(idempotency_key.to_string(), result.clone());
        Ok(result)
    }

    fn verify_webhook_signature(&self, body: &str, header: &str) -> BillingResult<bool> {
        let key = self.webhook_key.as_deref().ok_or_else(|| {
            BillingError::Configuration("webhook key not configured".to_string())
        })?;
        Ok(signature::verify(key, &self.notification_url, body, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_and_rejects_tampering() {
        let body = r#"{"type":"payment.completed"}"#;
        let header = signature::sign("key", "https://hooks.test/p", body);

        assert!(signature::verify("key", "https://hooks.test/p", body, &header));
        assert!(!signature::verify("key", "https://hooks.test/p", "tampered", &header));
        assert!(!signature::verify("other", "https://hooks.test/p", body, &header));
        // Signature binds the notification URL too
        assert!(!signature::verify("key", "https://evil.test/p", body, &header));
    }

    #[tokio::test]
    async fn fake_processor_dedupes_by_idempotency_key() {
        let fake = FakeProcessor::new(ProcessorKind::CardOnFile);

        let first = fake.capture(4900, "card_1", "sub-1:100").await.unwrap();
        let second = fake.capture(4900, "card_1", "sub-1:100").await.unwrap();

        assert_eq!(first, second, "same key must return the canonical result");
        assert_eq!(fake.capture_call_count(), 1);
    }
}
