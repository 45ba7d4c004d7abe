//! Billing endpoints: manual charge trigger and the redirect-order flow.

use axum::extract::{Path, State};
use axum::Json;
use fieldpay_billing::{BillingError, ChargeOutcome, OrderCaptureOutcome};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// Ceiling for a full-batch run triggered over HTTP; longer sweeps belong
/// to the scheduled worker.
const CHARGE_ALL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub subscription_id: Option<Uuid>,
    #[serde(default)]
    pub charge_all: bool,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub processed: usize,
    pub results: Vec<ChargeResult>,
}

#[derive(Debug, Serialize)]
pub struct ChargeResult {
    pub subscription_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ChargeOutcome> for ChargeResult {
    fn from(outcome: ChargeOutcome) -> Self {
        Self {
            subscription_id: outcome.subscription_id,
            success: outcome.success,
            amount: outcome.amount_cents,
            error: outcome.error,
        }
    }
}

/// POST /billing/charge
///
/// Exactly one of `subscription_id` or `charge_all` must be given. Outcomes
/// are reported per subscription; a declined card shows up as a failed entry
/// in the report, never as a request error.
pub async fn charge(
    State(state): State<AppState>,
    Json(req): Json<ChargeRequest>,
) -> ApiResult<Json<ChargeResponse>> {
    let now = OffsetDateTime::now_utc();
    match (req.subscription_id, req.charge_all) {
        (Some(subscription_id), false) => {
            let outcome = state.billing.cycle.run_single(subscription_id, now).await?;
            Ok(Json(ChargeResponse {
                processed: 1,
                results: vec![outcome.into()],
            }))
        }
        (None, true) => {
            let report = state
                .billing
                .cycle
                .run_batch(now, CHARGE_ALL_DEADLINE)
                .await?;
            Ok(Json(ChargeResponse {
                processed: report.attempted,
                results: report.outcomes.into_iter().map(Into::into).collect(),
            }))
        }
        _ => Err(BillingError::Validation(
            "provide exactly one of subscription_id or charge_all".into(),
        )
        .into()),
    }
}

/// POST /invoices/{id}/charge
///
/// Charge a sent invoice against the tenant's stored card and mark it paid.
pub async fn charge_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let invoice = state
        .billing
        .ledger
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;
    let record = state
        .billing
        .reconcile
        .capture_invoice(&invoice, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "invoice_number": invoice.invoice_number,
        "amount": record.amount_cents,
        "payment_ref": record.processor_payment_ref,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub tenant_id: Uuid,
}

/// POST /billing/processor-b/order
///
/// Phase one of the redirect flow: creates an order for the tenant's plan
/// price and hands back the approval URL.
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = state
        .billing
        .ledger
        .get_tenant(req.tenant_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("tenant {}", req.tenant_id)))?;
    let plan_id = tenant
        .subscription_plan
        .ok_or_else(|| BillingError::Validation("tenant has no subscription plan".into()))?;
    let plan = state
        .billing
        .ledger
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("plan {plan_id}")))?;

    let order = state
        .order_processor
        .create_order(plan.amount_cents, &req.tenant_id.to_string())
        .await?;

    tracing::info!(
        tenant_id = %req.tenant_id,
        order_id = %order.order_id,
        amount_cents = plan.amount_cents,
        "redirect order created"
    );
    Ok(Json(serde_json::json!({
        "order_id": order.order_id,
        "approval_url": order.approval_url,
        "status": order.status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CaptureOrderRequest {
    pub order_id: String,
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CaptureOrderResponse {
    pub success: bool,
    pub capture_id: String,
    pub amount_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub next_billing_date: OffsetDateTime,
}

/// POST /billing/processor-b/order/capture
///
/// Phase two: the payer approved the order; capture it and settle the
/// tenant's redirect-order subscription.
pub async fn capture_order(
    State(state): State<AppState>,
    Json(req): Json<CaptureOrderRequest>,
) -> ApiResult<Json<CaptureOrderResponse>> {
    let OrderCaptureOutcome {
        capture_id,
        amount_cents,
        next_billing_date,
    } = state
        .billing
        .reconcile
        .capture_order(req.tenant_id, &req.order_id, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(CaptureOrderResponse {
        success: true,
        capture_id,
        amount_cents,
        next_billing_date,
    }))
}
