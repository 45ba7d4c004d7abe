//! Redirect-order processor adapter (processor B)
//!
//! Two-phase flow: an order is created, the payer approves it at the
//! processor-hosted approval URL, then funds are captured against the order
//! id. The order id doubles as the capture source token.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProcessorConfig;
use crate::error::{BillingError, BillingResult, ProcessorFailure};
use crate::models::ProcessorKind;

use super::{PaymentResult, ProcessorAdapter};

pub struct RedirectOrderProcessor {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

/// Result of creating an order, returned to the caller for redirect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderDetails {
    pub order_id: String,
    pub approval_url: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
}

impl RedirectOrderProcessor {
    pub fn new(config: &ProcessorConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.order_api_base.trim_end_matches('/').to_string(),
            client_id: config.order_client_id.clone(),
            client_secret: config.order_client_secret.clone(),
        })
    }

    fn classify(err: reqwest::Error) -> ProcessorFailure {
        if err.is_timeout() {
            ProcessorFailure::Timeout
        } else {
            ProcessorFailure::Network(err.to_string())
        }
    }

    async fn access_token(&self) -> Result<String, ProcessorFailure> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(Self::classify)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProcessorFailure::Api(format!(
                "token request failed ({status})"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProcessorFailure::Api(format!("malformed token response: {e}")))?;
        Ok(token.access_token)
    }

    /// Phase one: create an order for payer approval.
    pub async fn create_order(
        &self,
        amount_cents: i64,
        reference: &str,
    ) -> BillingResult<OrderDetails> {
        let token = self
            .access_token()
            .await
            .map_err(BillingError::Processor)?;

        let response = self
            .http
            .post(format!("{}/v2/orders", self.api_base))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": reference,
                    "amount": {
                        "currency_code": "USD",
                        "value": format!("{}.{:02}", amount_cents / 100, amount_cents % 100),
                    },
                }],
            }))
            .send()
            .await
            .map_err(|e| BillingError::Processor(Self::classify(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Processor(ProcessorFailure::Api(format!(
                "order creation failed ({status}): {body}"
            ))));
        }

        let order: OrderResponse = response.json().await.map_err(|e| {
            BillingError::Processor(ProcessorFailure::Api(format!(
                "malformed order response: {e}"
            )))
        })?;

        let approval_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone())
            .unwrap_or_default();

        Ok(OrderDetails {
            order_id: order.id,
            approval_url,
            status: order.status,
        })
    }
}

#[async_trait]
impl ProcessorAdapter for RedirectOrderProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::RedirectOrder
    }

    async fn authorize(&self, _customer_ref: &str, source_token: &str) -> BillingResult<()> {
        // An approved order is the authorization in this flow; check that the
        // order exists and is approvable.
        let token = self
            .access_token()
            .await
            .map_err(BillingError::Processor)?;

        let response = self
            .http
            .get(format!("{}/v2/orders/{}", self.api_base, source_token))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BillingError::Processor(Self::classify(e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BillingError::NotFound(format!(
                "order {source_token} not found"
            )))
        }
    }

    /// Phase two: capture an approved order. `source_token` is the order id.
    async fn capture(
        &self,
        amount_cents: i64,
        source_token: &str,
        idempotency_key: &str,
    ) -> Result<PaymentResult, ProcessorFailure> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!(
                "{}/v2/orders/{}/capture",
                self.api_base, source_token
            ))
            .bearer_auth(&token)
            .header("Request-Id", idempotency_key)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
                return Err(ProcessorFailure::Declined {
                    code: "order_not_approved".to_string(),
                    message: body,
                });
            }
            return Err(ProcessorFailure::Api(format!(
                "order capture failed ({status}): {body}"
            )));
        }

        let capture: CaptureResponse = response
            .json()
            .await
            .map_err(|e| ProcessorFailure::Api(format!("malformed capture response: {e}")))?;

        if capture.status != "COMPLETED" {
            return Err(ProcessorFailure::Api(format!(
                "unexpected capture status: {}",
                capture.status
            )));
        }

        Ok(PaymentResult {
            payment_ref: capture.id,
            amount_cents,
        })
    }

    fn verify_webhook_signature(&self, _body: &str, _header: &str) -> BillingResult<bool> {
        // The redirect-order processor delivers no webhooks in this
        // deployment; payment state is driven by the explicit capture call.
        Err(BillingError::Configuration(
            "redirect-order processor has no webhook channel".to_string(),
        ))
    }
}
