//! Tenant deletion endpoint.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteTenantRequest {
    pub reason: Option<String>,
}

/// POST /tenants/{id}
///
/// The delete capability travels in `X-Capabilities`; without it the
/// settlement is refused with 403 before any fee attempt.
pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<DeleteTenantRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let can_delete = headers
        .get("x-capabilities")
        .and_then(|v| v.to_str().ok())
        .map(|caps| caps.split(',').any(|c| c.trim() == "tenant:delete"))
        .unwrap_or(false);

    let report = state
        .billing
        .settlement
        .delete_tenant(
            tenant_id,
            req.reason.as_deref(),
            can_delete,
            OffsetDateTime::now_utc(),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "success": report.success,
        "fee_charged": report.fee_charged,
        "fee_amount": report.fee_amount_cents,
        "charge_error": report.charge_error,
    })))
}
