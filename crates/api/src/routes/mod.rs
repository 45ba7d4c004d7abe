//! Route table

pub mod billing;
pub mod tenants;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/billing/charge", post(billing::charge))
        .route("/invoices/{id}/charge", post(billing::charge_invoice))
        .route("/billing/processor-b/order", post(billing::create_order))
        .route(
            "/billing/processor-b/order/capture",
            post(billing::capture_order),
        )
        .route("/webhooks/processor-a", post(webhooks::processor_a))
        .route("/tenants/{id}", post(tenants::delete_tenant))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
