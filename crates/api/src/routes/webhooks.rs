//! Processor webhook endpoint.
//!
//! Takes the raw body so the signature verifies over exactly the bytes the
//! processor signed. A missing or bad signature is a 401; everything the
//! gateway accepts (including ignored events) is a 200 so the processor
//! stops redelivering.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use fieldpay_billing::BillingError;
use time::OffsetDateTime;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn processor_a(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(BillingError::WebhookSignatureInvalid)?;

    let receipt = state
        .billing
        .webhooks
        .ingest(&body, signature, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(serde_json::json!({
        "received": true,
        "event_type": receipt.event_type,
    })))
}
