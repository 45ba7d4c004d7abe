//! Processor configuration
//!
//! Credentials are injected at service construction as an explicit
//! [`ProcessorConfig`]; nothing inside the engine reads ambient environment
//! variables. `from_env` exists for the composition roots (API server and
//! worker) only.

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

/// Credentials and endpoints for both payment processors.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Base URL of the card-on-file processor API.
    pub card_api_base: String,
    /// Secret API key for the card-on-file processor.
    pub card_api_key: String,
    /// Shared HMAC key for card-processor webhook signatures. Absent means
    /// webhook ingestion is not configured and must abort with a
    /// configuration error before touching the ledger.
    pub card_webhook_key: Option<String>,
    /// Public notification URL registered with the card processor; part of
    /// the signed webhook payload.
    pub notification_url: String,
    /// Base URL of the redirect-order processor API.
    pub order_api_base: String,
    pub order_client_id: String,
    pub order_client_secret: String,
    /// Bounded timeout for every processor call. A timeout is a failure
    /// outcome, never an unknown state.
    pub timeout: Duration,
}

impl ProcessorConfig {
    /// Load from the environment. Only the composition roots call this.
    pub fn from_env() -> BillingResult<Self> {
        fn required(name: &str) -> BillingResult<String> {
            std::env::var(name)
                .map_err(|_| BillingError::Configuration(format!("{name} must be set")))
        }

        let timeout_secs = std::env::var("PROCESSOR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            card_api_base: required("CARD_PROCESSOR_API_BASE")?,
            card_api_key: required("CARD_PROCESSOR_API_KEY")?,
            card_webhook_key: std::env::var("CARD_PROCESSOR_WEBHOOK_KEY").ok(),
            notification_url: required("PROCESSOR_NOTIFICATION_URL")?,
            order_api_base: required("ORDER_PROCESSOR_API_BASE")?,
            order_client_id: required("ORDER_PROCESSOR_CLIENT_ID")?,
            order_client_secret: required("ORDER_PROCESSOR_CLIENT_SECRET")?,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}
