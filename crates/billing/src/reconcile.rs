//! Payment reconciliation
//!
//! Every charge flows through here: derive a deterministic idempotency
//! key, check the ledger for a prior success under that key, hand the
//! capture to the processor adapter, then write the payment record and
//! the dependent state transitions. Processor-side dedup and ledger-side
//! uniqueness on the processor payment ref together guarantee at most
//! one money movement per key.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::cycle::{advance_period, default_due_date};
use crate::documents::next_invoice_number;
use crate::error::{BillingError, BillingResult, ProcessorFailure};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::ledger::Ledger;
use crate::models::{
    Invoice, InvoiceStatus, LineItem, PaymentRecord, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, TenantStatus,
};
use crate::notify::NotificationPort;
use crate::processors::ProcessorSet;

/// Idempotency key for a subscription renewal: stable across retries of
/// the same period, distinct once the period advances.
pub fn subscription_charge_key(subscription_id: Uuid, period_start: OffsetDateTime) -> String {
    format!("sub-{subscription_id}-{}", period_start.unix_timestamp())
}

pub fn invoice_charge_key(invoice_id: Uuid) -> String {
    format!("inv-{invoice_id}")
}

pub fn cancellation_fee_key(tenant_id: Uuid) -> String {
    format!("fee-{tenant_id}-cancellation")
}

/// Result of settling an approved redirect order.
#[derive(Debug, serde::Serialize)]
pub struct OrderCaptureOutcome {
    pub capture_id: String,
    pub amount_cents: i64,
    pub next_billing_date: OffsetDateTime,
}

pub struct ReconciliationService {
    ledger: Arc<dyn Ledger>,
    processors: ProcessorSet,
    notifier: Arc<dyn NotificationPort>,
    events: BillingEventLogger,
}

impl ReconciliationService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        processors: ProcessorSet,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        let events = BillingEventLogger::new(ledger.clone());
        Self {
            ledger,
            processors,
            notifier,
            events,
        }
    }

    /// Charge a subscription for the period that just lapsed. On success
    /// the period advances (anchored at `now`), a paid invoice is written,
    /// and any payment-failed flags on the tenant and subscription clear.
    /// On failure the period stays where it was so the next batch retries.
    pub async fn capture_subscription(
        &self,
        subscription: &Subscription,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentRecord> {
        if !subscription.charge_eligible() {
            return Err(BillingError::Validation(format!(
                "subscription {} is not chargeable",
                subscription.id
            )));
        }
        let card_ref = subscription.processor_card_ref.as_deref().ok_or_else(|| {
            BillingError::Validation(format!("subscription {} has no stored card", subscription.id))
        })?;

        let plan = self
            .ledger
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", subscription.plan_id)))?;

        let key = subscription_charge_key(subscription.id, subscription.current_period_start);
        if let Some(prior) = self
            .ledger
            .find_payment_by_key(&key, PaymentStatus::Succeeded)
            .await?
        {
            tracing::info!(
                subscription_id = %subscription.id,
                idempotency_key = %key,
                "charge already settled for this period, skipping capture"
            );
            self.repair_stalled_period(subscription, &plan, &prior)
                .await?;
            return Ok(prior);
        }

        let description = format!("{} subscription renewal", plan.name);
        match self
            .capture_via(subscription, &plan, card_ref, &key, &description, now)
            .await
        {
            Ok(result) => {
                self.settle_subscription_success(subscription, &plan, &result, now)
                    .await
            }
            Err(failure) => {
                self.settle_subscription_failure(subscription, &plan, &key, &failure, now)
                    .await?;
                Err(BillingError::Processor(failure))
            }
        }
    }

    /// Charge a sent invoice against the tenant's stored card and mark it
    /// paid. The invoice must still be in the sent state when the payment
    /// lands; a concurrent payment loses the conditional transition and
    /// surfaces as a conflict.
    pub async fn capture_invoice(
        &self,
        invoice: &Invoice,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentRecord> {
        if invoice.status != InvoiceStatus::Sent {
            return Err(BillingError::Conflict(format!(
                "invoice {} is {}, only sent invoices can be charged",
                invoice.invoice_number, invoice.status
            )));
        }
        let tenant = self
            .ledger
            .get_tenant(invoice.tenant_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("tenant {}", invoice.tenant_id)))?;
        let card_ref = tenant.processor_card_ref.as_deref().ok_or_else(|| {
            BillingError::Validation("tenant has no payment method on file".into())
        })?;

        let key = invoice_charge_key(invoice.id);
        if let Some(prior) = self
            .ledger
            .find_payment_by_key(&key, PaymentStatus::Succeeded)
            .await?
        {
            return Ok(prior);
        }

        let adapter = self.processors.card_on_file.clone();
        let result = match adapter.capture(invoice.amount_cents, card_ref, &key).await {
            Ok(result) => result,
            Err(failure) => {
                self.ledger
                    .insert_payment(&PaymentRecord {
                        id: Uuid::new_v4(),
                        tenant_id: invoice.tenant_id,
                        amount_cents: invoice.amount_cents,
                        status: PaymentStatus::Failed,
                        processor_payment_ref: None,
                        idempotency_key: key,
                        description: format!("invoice {}", invoice.invoice_number),
                        error: Some(failure.to_string()),
                        related_subscription_id: None,
                        created_at: now,
                    })
                    .await?;
                return Err(BillingError::Processor(failure));
            }
        };

        let record = self
            .ledger
            .insert_payment(&PaymentRecord {
                id: Uuid::new_v4(),
                tenant_id: invoice.tenant_id,
                amount_cents: result.amount_cents,
                status: PaymentStatus::Succeeded,
                processor_payment_ref: Some(result.payment_ref.clone()),
                idempotency_key: key,
                description: format!("invoice {}", invoice.invoice_number),
                error: None,
                related_subscription_id: None,
                created_at: now,
            })
            .await?;

        let transitioned = self
            .ledger
            .transition_invoice(
                invoice.id,
                InvoiceStatus::Sent,
                InvoiceStatus::Paid,
                Some(now),
                Some(&result.payment_ref),
                Some("card_on_file"),
            )
            .await?;
        if !transitioned {
            return Err(BillingError::Conflict(format!(
                "invoice {} left the sent state during capture",
                invoice.invoice_number
            )));
        }

        self.events
            .log(
                BillingEvent::new(BillingEventType::InvoicePaid, Some(invoice.tenant_id)).data(
                    serde_json::json!({
                        "invoice_number": invoice.invoice_number,
                        "amount_cents": record.amount_cents,
                        "payment_ref": result.payment_ref,
                    }),
                ),
            )
            .await;

        if let Err(e) = self
            .notifier
            .payment_receipt(invoice.tenant_id, record.amount_cents, &record.description)
            .await
        {
            tracing::error!(tenant_id = %invoice.tenant_id, error = %e, "receipt delivery failed");
        }

        Ok(record)
    }

    /// Capture an approved redirect order as a subscription renewal. The
    /// order id is the capture token; on success the tenant's redirect-order
    /// subscription settles exactly like a card renewal.
    pub async fn capture_order(
        &self,
        tenant_id: Uuid,
        order_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<OrderCaptureOutcome> {
        let subscription = self
            .ledger
            .list_subscriptions_for_tenant(tenant_id)
            .await?
            .into_iter()
            .find(|s| {
                s.processor == crate::models::ProcessorKind::RedirectOrder
                    && s.status != SubscriptionStatus::Cancelled
            })
            .ok_or_else(|| {
                BillingError::NotFound(format!(
                    "tenant {tenant_id} has no active redirect-order subscription"
                ))
            })?;
        let plan = self
            .ledger
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", subscription.plan_id)))?;

        let key = subscription_charge_key(subscription.id, subscription.current_period_start);
        if let Some(prior) = self
            .ledger
            .find_payment_by_key(&key, PaymentStatus::Succeeded)
            .await?
        {
            self.repair_stalled_period(&subscription, &plan, &prior)
                .await?;
            let next_billing_date = advance_period(plan.billing_interval, prior.created_at);
            return Ok(OrderCaptureOutcome {
                capture_id: prior.processor_payment_ref.clone().unwrap_or_default(),
                amount_cents: prior.amount_cents,
                next_billing_date,
            });
        }

        let adapter = self.processors.redirect_order.clone();
        match adapter.capture(plan.amount_cents, order_id, &key).await {
            Ok(result) => {
                let capture_id = result.payment_ref.clone();
                let record = self
                    .settle_subscription_success(&subscription, &plan, &result, now)
                    .await?;
                Ok(OrderCaptureOutcome {
                    capture_id,
                    amount_cents: record.amount_cents,
                    next_billing_date: advance_period(plan.billing_interval, now),
                })
            }
            Err(failure) => {
                self.settle_subscription_failure(&subscription, &plan, &key, &failure, now)
                    .await?;
                Err(BillingError::Processor(failure))
            }
        }
    }

    /// One-off fee charge (cancellation fee). Never creates an invoice or
    /// touches periods; the caller decides what a failure means.
    pub async fn capture_fee(
        &self,
        tenant_id: Uuid,
        amount_cents: i64,
        key: &str,
        description: &str,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentRecord> {
        let tenant = self
            .ledger
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("tenant {tenant_id}")))?;
        let card_ref = tenant.processor_card_ref.as_deref().ok_or_else(|| {
            BillingError::Validation("No payment method on file".into())
        })?;

        if let Some(prior) = self
            .ledger
            .find_payment_by_key(key, PaymentStatus::Succeeded)
            .await?
        {
            return Ok(prior);
        }

        let adapter = self.processors.card_on_file.clone();
        match adapter.capture(amount_cents, card_ref, key).await {
            Ok(result) => {
                let record = self
                    .ledger
                    .insert_payment(&PaymentRecord {
                        id: Uuid::new_v4(),
                        tenant_id,
                        amount_cents: result.amount_cents,
                        status: PaymentStatus::Succeeded,
                        processor_payment_ref: Some(result.payment_ref),
                        idempotency_key: key.to_string(),
                        description: description.to_string(),
                        error: None,
                        related_subscription_id: None,
                        created_at: now,
                    })
                    .await?;
                Ok(record)
            }
            Err(failure) => {
                self.ledger
                    .insert_payment(&PaymentRecord {
                        id: Uuid::new_v4(),
                        tenant_id,
                        amount_cents,
                        status: PaymentStatus::Failed,
                        processor_payment_ref: None,
                        idempotency_key: key.to_string(),
                        description: description.to_string(),
                        error: Some(failure.to_string()),
                        related_subscription_id: None,
                        created_at: now,
                    })
                    .await?;
                Err(BillingError::Processor(failure))
            }
        }
    }

    /// Record a payment outcome the processor reported out of band (webhook
    /// delivery). The unique processor payment ref collapses redelivery onto
    /// the canonical record, so the same event recorded twice still yields
    /// one row.
    pub async fn record_external_payment(
        &self,
        tenant_id: Uuid,
        payment_ref: &str,
        amount_cents: i64,
        succeeded: bool,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentRecord> {
        let (status, error) = if succeeded {
            (PaymentStatus::Succeeded, None)
        } else {
            (
                PaymentStatus::Failed,
                Some("processor reported payment failure".to_string()),
            )
        };
        self.ledger
            .insert_payment(&PaymentRecord {
                id: Uuid::new_v4(),
                tenant_id,
                amount_cents,
                status,
                processor_payment_ref: Some(payment_ref.to_string()),
                idempotency_key: format!("ext-{payment_ref}"),
                description: "processor-reported payment".to_string(),
                error,
                related_subscription_id: None,
                created_at: now,
            })
            .await
    }

    /// A succeeded record whose follow-up writes were interrupted leaves the
    /// period where the key was derived from, so the subscription keeps
    /// showing up as due. Finish the advance before returning the prior
    /// record. A period that already moved on means another settlement won
    /// the race and there is nothing to do.
    async fn repair_stalled_period(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        prior: &PaymentRecord,
    ) -> BillingResult<()> {
        let Some(stored) = self.ledger.get_subscription(subscription.id).await? else {
            return Ok(());
        };
        if stored.current_period_start != subscription.current_period_start {
            return Ok(());
        }
        let anchor = prior.created_at;
        let next_end = advance_period(plan.billing_interval, anchor);
        self.ledger
            .advance_subscription_period(subscription.id, anchor, next_end)
            .await?;
        self.ledger
            .set_tenant_status(subscription.tenant_id, TenantStatus::Active)
            .await?;
        tracing::warn!(
            subscription_id = %subscription.id,
            period_end = next_end.unix_timestamp(),
            "finished an interrupted settlement; period advanced"
        );
        Ok(())
    }

    async fn capture_via(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        card_ref: &str,
        key: &str,
        description: &str,
        _now: OffsetDateTime,
    ) -> Result<crate::processors::PaymentResult, ProcessorFailure> {
        tracing::info!(
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            amount = fieldpay_shared::format_cents(plan.amount_cents),
            processor = subscription.processor.as_str(),
            description,
            "capturing subscription charge"
        );
        let adapter = self.processors.for_kind(subscription.processor);
        adapter.capture(plan.amount_cents, card_ref, key).await
    }

    async fn settle_subscription_success(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        result: &crate::processors::PaymentResult,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentRecord> {
        let key = subscription_charge_key(subscription.id, subscription.current_period_start);
        let record = self
            .ledger
            .insert_payment(&PaymentRecord {
                id: Uuid::new_v4(),
                tenant_id: subscription.tenant_id,
                amount_cents: result.amount_cents,
                status: PaymentStatus::Succeeded,
                processor_payment_ref: Some(result.payment_ref.clone()),
                idempotency_key: key,
                description: format!("{} subscription renewal", plan.name),
                error: None,
                related_subscription_id: Some(subscription.id),
                created_at: now,
            })
            .await?;

        // New period anchors at capture time, not at the old period end.
        let next_end = advance_period(plan.billing_interval, now);
        self.ledger
            .advance_subscription_period(subscription.id, now, next_end)
            .await?;
        self.ledger
            .set_tenant_status(subscription.tenant_id, TenantStatus::Active)
            .await?;

        let invoice = Invoice {
            id: Uuid::new_v4(),
            tenant_id: subscription.tenant_id,
            invoice_number: next_invoice_number(now),
            status: InvoiceStatus::Paid,
            amount_cents: result.amount_cents,
            due_date: default_due_date(now),
            line_items: vec![LineItem {
                description: format!("{} subscription renewal", plan.name),
                quantity: 1,
                unit_amount_cents: plan.amount_cents,
            }],
            paid_at: Some(now),
            processor_payment_ref: Some(result.payment_ref.clone()),
            payment_source: Some(subscription.processor.as_str().to_string()),
            subscription_id: Some(subscription.id),
            created_at: now,
        };
        self.ledger.insert_invoice(&invoice).await?;

        self.events
            .log(
                BillingEvent::new(BillingEventType::ChargeSucceeded, Some(subscription.tenant_id))
                    .data(serde_json::json!({
                        "subscription_id": subscription.id,
                        "amount_cents": result.amount_cents,
                        "payment_ref": result.payment_ref,
                        "period_end": next_end.unix_timestamp(),
                    })),
            )
            .await;
        self.events
            .log(
                BillingEvent::new(BillingEventType::PeriodAdvanced, Some(subscription.tenant_id))
                    .data(serde_json::json!({
                        "subscription_id": subscription.id,
                        "period_start": now.unix_timestamp(),
                        "period_end": next_end.unix_timestamp(),
                    })),
            )
            .await;

        if let Err(e) = self
            .notifier
            .payment_receipt(subscription.tenant_id, record.amount_cents, &record.description)
            .await
        {
            tracing::error!(
                tenant_id = %subscription.tenant_id,
                error = %e,
                "receipt delivery failed"
            );
        }

        Ok(record)
    }

    async fn settle_subscription_failure(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        key: &str,
        failure: &ProcessorFailure,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        self.ledger
            .insert_payment(&PaymentRecord {
                id: Uuid::new_v4(),
                tenant_id: subscription.tenant_id,
                amount_cents: plan.amount_cents,
                status: PaymentStatus::Failed,
                processor_payment_ref: None,
                idempotency_key: key.to_string(),
                description: format!("{} subscription renewal", plan.name),
                error: Some(failure.to_string()),
                related_subscription_id: Some(subscription.id),
                created_at: now,
            })
            .await?;

        // Period stays put; the next batch picks this subscription up again.
        self.ledger
            .set_subscription_status(subscription.id, SubscriptionStatus::PaymentFailed)
            .await?;
        self.ledger
            .set_tenant_status(subscription.tenant_id, TenantStatus::PaymentFailed)
            .await?;

        self.events
            .log(
                BillingEvent::new(BillingEventType::ChargeFailed, Some(subscription.tenant_id))
                    .data(serde_json::json!({
                        "subscription_id": subscription.id,
                        "amount_cents": plan.amount_cents,
                        "kind": failure.kind(),
                        "error": failure.to_string(),
                    })),
            )
            .await;

        if let Err(e) = self
            .notifier
            .payment_failed(subscription.tenant_id, plan.amount_cents, &failure.to_string())
            .await
        {
            tracing::error!(
                tenant_id = %subscription.tenant_id,
                error = %e,
                "failure notice delivery failed"
            );
        }

        Ok(())
    }
}
