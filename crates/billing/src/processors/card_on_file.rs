//! Card-on-file processor adapter (processor A)
//!
//! Tokenized capture: a stored card reference is charged directly, with the
//! idempotency key passed through as a request header so the processor can
//! deduplicate retries.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProcessorConfig;
use crate::error::{BillingError, BillingResult, ProcessorFailure};
use crate::models::ProcessorKind;

use super::{signature, PaymentResult, ProcessorAdapter};

pub struct CardOnFileProcessor {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    webhook_key: Option<String>,
    notification_url: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl CardOnFileProcessor {
    pub fn new(config: &ProcessorConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.card_api_base.trim_end_matches('/').to_string(),
            api_key: config.card_api_key.clone(),
            webhook_key: config.card_webhook_key.clone(),
            notification_url: config.notification_url.clone(),
        })
    }

    fn classify(err: reqwest::Error) -> ProcessorFailure {
        if err.is_timeout() {
            ProcessorFailure::Timeout
        } else {
            ProcessorFailure::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ProcessorAdapter for CardOnFileProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::CardOnFile
    }

    async fn authorize(&self, customer_ref: &str, source_token: &str) -> BillingResult<()> {
        let response = self
            .http
            .post(format!("{}/v1/card_verifications", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "customer": customer_ref,
                "source": source_token,
            }))
            .send()
            .await
            .map_err(|e| BillingError::Processor(Self::classify(e)))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BillingError::Processor(ProcessorFailure::Api(format!(
            "card verification failed ({status}): {body}"
        ))))
    }

    async fn capture(
        &self,
        amount_cents: i64,
        source_token: &str,
        idempotency_key: &str,
    ) -> Result<PaymentResult, ProcessorFailure> {
        let response = self
            .http
            .post(format!("{}/v1/charges", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&serde_json::json!({
                "amount": amount_cents,
                "currency": "usd",
                "source": source_token,
                "capture": true,
            }))
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if status.is_success() {
            let charge: ChargeResponse = response
                .json()
                .await
                .map_err(|e| ProcessorFailure::Api(format!("malformed charge response: {e}")))?;
            return Ok(PaymentResult {
                payment_ref: charge.id,
                amount_cents: charge.amount,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            // Declines come back as 402 with a structured error object
            let parsed: Result<ErrorResponse, _> = serde_json::from_str(&body);
            return Err(match parsed {
                Ok(err) => ProcessorFailure::Declined {
                    code: err.error.code,
                    message: err.error.message,
                },
                Err(_) => ProcessorFailure::Declined {
                    code: "card_declined".to_string(),
                    message: body,
                },
            });
        }

        Err(ProcessorFailure::Api(format!(
            "charge failed ({status}): {body}"
        )))
    }

    fn verify_webhook_signature(&self, body: &str, header: &str) -> BillingResult<bool> {
        let key = self.webhook_key.as_deref().ok_or_else(|| {
            BillingError::Configuration("CARD_PROCESSOR_WEBHOOK_KEY not configured".to_string())
        })?;
        Ok(signature::verify(key, &self.notification_url, body, header))
    }
}
