//! Billing event audit log
//!
//! Append-only record of what the engine did and why: charge outcomes,
//! document transitions, tenant deletions. Logging failures are downgraded
//! to warnings; the audit trail never blocks a billing operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    ChargeSucceeded,
    ChargeFailed,
    PeriodAdvanced,
    InvoiceSent,
    InvoicePaid,
    EstimateConverted,
    WebhookApplied,
    CardDisabled,
    TenantDeleted,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::ChargeSucceeded => "charge_succeeded",
            BillingEventType::ChargeFailed => "charge_failed",
            BillingEventType::PeriodAdvanced => "period_advanced",
            BillingEventType::InvoiceSent => "invoice_sent",
            BillingEventType::InvoicePaid => "invoice_paid",
            BillingEventType::EstimateConverted => "estimate_converted",
            BillingEventType::WebhookApplied => "webhook_applied",
            BillingEventType::CardDisabled => "card_disabled",
            BillingEventType::TenantDeleted => "tenant_deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub event_type: BillingEventType,
    pub data: serde_json::Value,
    pub created_at: OffsetDateTime,
}

impl BillingEvent {
    pub fn new(event_type: BillingEventType, tenant_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type,
            data: serde_json::Value::Null,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Best-effort writer for the audit log.
#[derive(Clone)]
pub struct BillingEventLogger {
    ledger: Arc<dyn Ledger>,
}

impl BillingEventLogger {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn log(&self, event: BillingEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.ledger.append_billing_event(&event).await {
            tracing::warn!(
                event_type = event_type.as_str(),
                error = %e,
                "Failed to append billing event"
            );
        }
    }
}
