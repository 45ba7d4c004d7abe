//! Invoice and estimate lifecycle
//!
//! Status changes are conditional transitions: the write names both the
//! expected current state and the target, and a zero-row update means
//! someone else got there first. Overdue is never stored; it is derived
//! from `sent` plus a lapsed due date at read time.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::cycle::default_due_date;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::ledger::Ledger;
use crate::models::{Estimate, EstimateStatus, Invoice, InvoiceStatus, LineItem};
use crate::notify::NotificationPort;

fn date_fragment(now: OffsetDateTime) -> String {
    let date = now.date();
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

fn uuid_fragment() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_uppercase()
}

/// Document numbers are date-prefixed with a random suffix; uniqueness is
/// enforced by the ledger, not by the generator.
pub fn next_invoice_number(now: OffsetDateTime) -> String {
    format!("INV-{}-{}", date_fragment(now), uuid_fragment())
}

pub fn next_estimate_number(now: OffsetDateTime) -> String {
    format!("EST-{}-{}", date_fragment(now), uuid_fragment())
}

pub fn total_cents(items: &[LineItem]) -> i64 {
    items
        .iter()
        .map(|item| item.quantity * item.unit_amount_cents)
        .sum()
}

pub struct DocumentService {
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn NotificationPort>,
    events: BillingEventLogger,
}

impl DocumentService {
    pub fn new(ledger: Arc<dyn Ledger>, notifier: Arc<dyn NotificationPort>) -> Self {
        let events = BillingEventLogger::new(ledger.clone());
        Self {
            ledger,
            notifier,
            events,
        }
    }

    pub async fn create_invoice(
        &self,
        tenant_id: Uuid,
        line_items: Vec<LineItem>,
        due_date: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        if line_items.is_empty() {
            return Err(BillingError::Validation(
                "invoice needs at least one line item".into(),
            ));
        }
        let invoice = Invoice {
            id: Uuid::new_v4(),
            tenant_id,
            invoice_number: next_invoice_number(now),
            status: InvoiceStatus::Draft,
            amount_cents: total_cents(&line_items),
            due_date: due_date.unwrap_or_else(|| default_due_date(now)),
            line_items,
            paid_at: None,
            processor_payment_ref: None,
            payment_source: None,
            subscription_id: None,
            created_at: now,
        };
        self.ledger.insert_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Draft -> sent. Only drafts can be sent.
    pub async fn send_invoice(&self, invoice_id: Uuid) -> BillingResult<Invoice> {
        let invoice = self.require_invoice(invoice_id).await?;
        let transitioned = self
            .ledger
            .transition_invoice(
                invoice_id,
                InvoiceStatus::Draft,
                InvoiceStatus::Sent,
                None,
                None,
                None,
            )
            .await?;
        if !transitioned {
            return Err(BillingError::Conflict(format!(
                "invoice {} is {}, only drafts can be sent",
                invoice.invoice_number, invoice.status
            )));
        }

        self.events
            .log(
                BillingEvent::new(BillingEventType::InvoiceSent, Some(invoice.tenant_id)).data(
                    serde_json::json!({ "invoice_number": invoice.invoice_number }),
                ),
            )
            .await;
        if let Err(e) = self
            .notifier
            .invoice_sent(invoice.tenant_id, &invoice.invoice_number)
            .await
        {
            tracing::error!(
                tenant_id = %invoice.tenant_id,
                error = %e,
                "invoice notice delivery failed"
            );
        }
        self.require_invoice(invoice_id).await
    }

    /// Record an out-of-band payment (check, bank transfer) against a sent
    /// invoice. Card payments go through reconciliation instead.
    pub async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        payment_source: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        let invoice = self.require_invoice(invoice_id).await?;
        let transitioned = self
            .ledger
            .transition_invoice(
                invoice_id,
                InvoiceStatus::Sent,
                InvoiceStatus::Paid,
                Some(now),
                None,
                Some(payment_source),
            )
            .await?;
        if !transitioned {
            return Err(BillingError::Conflict(format!(
                "invoice {} is {}, only sent invoices can be marked paid",
                invoice.invoice_number, invoice.status
            )));
        }

        self.events
            .log(
                BillingEvent::new(BillingEventType::InvoicePaid, Some(invoice.tenant_id)).data(
                    serde_json::json!({
                        "invoice_number": invoice.invoice_number,
                        "payment_source": payment_source,
                    }),
                ),
            )
            .await;
        self.require_invoice(invoice_id).await
    }

    pub async fn create_estimate(
        &self,
        tenant_id: Uuid,
        line_items: Vec<LineItem>,
        now: OffsetDateTime,
    ) -> BillingResult<Estimate> {
        if line_items.is_empty() {
            return Err(BillingError::Validation(
                "estimate needs at least one line item".into(),
            ));
        }
        let estimate = Estimate {
            id: Uuid::new_v4(),
            tenant_id,
            estimate_number: next_estimate_number(now),
            status: EstimateStatus::Draft,
            amount_cents: total_cents(&line_items),
            line_items,
            converted_to_invoice_id: None,
            created_at: now,
        };
        self.ledger.insert_estimate(&estimate).await?;
        Ok(estimate)
    }

    pub async fn send_estimate(&self, estimate_id: Uuid) -> BillingResult<Estimate> {
        self.transition(estimate_id, EstimateStatus::Draft, EstimateStatus::Sent)
            .await
    }

    pub async fn accept_estimate(&self, estimate_id: Uuid) -> BillingResult<Estimate> {
        self.transition(estimate_id, EstimateStatus::Sent, EstimateStatus::Accepted)
            .await
    }

    pub async fn decline_estimate(&self, estimate_id: Uuid) -> BillingResult<Estimate> {
        self.transition(estimate_id, EstimateStatus::Sent, EstimateStatus::Declined)
            .await
    }

    /// Accepted -> converted, exactly once. The conversion claims the
    /// estimate and creates the draft invoice atomically; a second call,
    /// or a call on a declined or already-converted estimate, conflicts.
    pub async fn convert_to_invoice(
        &self,
        estimate_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        let estimate = self.require_estimate(estimate_id).await?;
        let invoice = Invoice {
            id: Uuid::new_v4(),
            tenant_id: estimate.tenant_id,
            invoice_number: next_invoice_number(now),
            status: InvoiceStatus::Draft,
            amount_cents: estimate.amount_cents,
            due_date: default_due_date(now),
            line_items: estimate.line_items.clone(),
            paid_at: None,
            processor_payment_ref: None,
            payment_source: None,
            subscription_id: None,
            created_at: now,
        };

        let converted = self.ledger.convert_estimate(estimate_id, &invoice).await?;
        if !converted {
            return Err(BillingError::Conflict(format!(
                "estimate {} is {}, only accepted estimates convert",
                estimate.estimate_number, estimate.status
            )));
        }

        self.events
            .log(
                BillingEvent::new(BillingEventType::EstimateConverted, Some(estimate.tenant_id))
                    .data(serde_json::json!({
                        "estimate_number": estimate.estimate_number,
                        "invoice_number": invoice.invoice_number,
                        "amount_cents": invoice.amount_cents,
                    })),
            )
            .await;
        Ok(invoice)
    }

    async fn transition(
        &self,
        estimate_id: Uuid,
        from: EstimateStatus,
        to: EstimateStatus,
    ) -> BillingResult<Estimate> {
        let estimate = self.require_estimate(estimate_id).await?;
        let transitioned = self.ledger.transition_estimate(estimate_id, from, to).await?;
        if !transitioned {
            return Err(BillingError::Conflict(format!(
                "estimate {} is {}, expected {from}",
                estimate.estimate_number, estimate.status
            )));
        }
        self.require_estimate(estimate_id).await
    }

    async fn require_invoice(&self, id: Uuid) -> BillingResult<Invoice> {
        self.ledger
            .get_invoice(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {id}")))
    }

    async fn require_estimate(&self, id: Uuid) -> BillingResult<Estimate> {
        self.ledger
            .get_estimate(id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("estimate {id}")))
    }
}
