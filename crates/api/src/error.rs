//! HTTP error mapping
//!
//! Translates `BillingError` variants into response statuses. Internal
//! details (database text, processor bodies) are logged, never echoed back.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fieldpay_billing::BillingError;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub BillingError);

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BillingError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            BillingError::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            BillingError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            BillingError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            BillingError::Processor(failure) => {
                (StatusCode::PAYMENT_REQUIRED, failure.to_string())
            }
            BillingError::WebhookSignatureInvalid => {
                (StatusCode::UNAUTHORIZED, "invalid signature".to_string())
            }
            BillingError::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server misconfigured".to_string(),
                )
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
