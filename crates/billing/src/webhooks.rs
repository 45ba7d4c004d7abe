//! Webhook ingestion
//!
//! Signature verification happens before any ledger write; an unsigned or
//! tampered delivery leaves no trace beyond a warning. Verified events are
//! claimed by id so redelivery is a no-op, and events for unknown tenants
//! or unknown types are acknowledged and ignored rather than bounced back
//! for the processor to retry forever.

use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::ledger::Ledger;
use crate::models::TenantStatus;
use crate::processors::ProcessorSet;
use crate::reconcile::ReconciliationService;

#[derive(Debug, Deserialize)]
struct ProcessorEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    customer_ref: Option<String>,
    card_ref: Option<String>,
    payment_ref: Option<String>,
    amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    Applied,
    Duplicate,
    Ignored,
}

#[derive(Debug, serde::Serialize)]
pub struct WebhookReceipt {
    pub event_type: String,
    pub disposition: WebhookDisposition,
}

pub struct WebhookGateway {
    ledger: Arc<dyn Ledger>,
    processors: ProcessorSet,
    reconcile: Arc<ReconciliationService>,
    events: BillingEventLogger,
}

impl WebhookGateway {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        processors: ProcessorSet,
        reconcile: Arc<ReconciliationService>,
    ) -> Self {
        let events = BillingEventLogger::new(ledger.clone());
        Self {
            ledger,
            processors,
            reconcile,
            events,
        }
    }

    pub async fn ingest(
        &self,
        raw_body: &str,
        signature_header: &str,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookReceipt> {
        // Reject before touching the ledger.
        let valid = self
            .processors
            .card_on_file
            .verify_webhook_signature(raw_body, signature_header)?;
        if !valid {
            tracing::warn!("webhook rejected: signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: ProcessorEvent = serde_json::from_str(raw_body)
            .map_err(|e| BillingError::Validation(format!("malformed webhook payload: {e}")))?;

        let claimed = self
            .ledger
            .claim_webhook_event(&event.id, &event.event_type)
            .await?;
        if !claimed {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "webhook replayed, skipping"
            );
            return Ok(WebhookReceipt {
                event_type: event.event_type,
                disposition: WebhookDisposition::Duplicate,
            });
        }

        let disposition = match self.apply(&event, now).await {
            Ok(disposition) => {
                let label = match disposition {
                    WebhookDisposition::Applied => "applied",
                    _ => "ignored",
                };
                self.ledger.mark_webhook_event(&event.id, label, None).await?;
                disposition
            }
            Err(e) => {
                self.ledger
                    .mark_webhook_event(&event.id, "failed", Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        Ok(WebhookReceipt {
            event_type: event.event_type,
            disposition,
        })
    }

    async fn apply(
        &self,
        event: &ProcessorEvent,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookDisposition> {
        let Some(customer_ref) = event.data.customer_ref.as_deref() else {
            tracing::info!(event_type = %event.event_type, "webhook carries no customer ref, ignoring");
            return Ok(WebhookDisposition::Ignored);
        };
        let Some(tenant) = self.ledger.find_tenant_by_customer_ref(customer_ref).await? else {
            tracing::info!(customer_ref, "webhook for unknown tenant, ignoring");
            return Ok(WebhookDisposition::Ignored);
        };

        match event.event_type.as_str() {
            "payment.completed" => {
                // The money moved either way, but a deleted tenant never
                // comes back to life because of a late delivery.
                if tenant.deleted_at.is_some() {
                    tracing::warn!(
                        tenant_id = %tenant.id,
                        event_id = %event.id,
                        "payment reported for a deleted tenant, not reactivating"
                    );
                } else {
                    self.ledger
                        .set_tenant_status(tenant.id, TenantStatus::Active)
                        .await?;
                }
                self.ledger_payment(event, tenant.id, true, now).await?;
                self.record(event, tenant.id, "payment completed").await;
                Ok(WebhookDisposition::Applied)
            }
            "payment.failed" => {
                if tenant.deleted_at.is_none() {
                    self.ledger
                        .set_tenant_status(tenant.id, TenantStatus::PaymentFailed)
                        .await?;
                }
                self.ledger_payment(event, tenant.id, false, now).await?;
                self.record(event, tenant.id, "payment failed").await;
                Ok(WebhookDisposition::Applied)
            }
            "card.created" | "card.updated" => {
                let Some(card_ref) = event.data.card_ref.as_deref() else {
                    return Ok(WebhookDisposition::Ignored);
                };
                self.ledger
                    .set_tenant_card_ref(tenant.id, Some(card_ref))
                    .await?;
                self.record(event, tenant.id, "card updated").await;
                Ok(WebhookDisposition::Applied)
            }
            "card.disabled" => {
                self.ledger.set_tenant_card_ref(tenant.id, None).await?;
                let cleared = self.ledger.clear_subscription_card_refs(tenant.id).await?;
                tracing::info!(
                    tenant_id = %tenant.id,
                    subscriptions = cleared,
                    "card disabled, cleared stored refs"
                );
                self.events
                    .log(
                        BillingEvent::new(BillingEventType::CardDisabled, Some(tenant.id)).data(
                            serde_json::json!({
                                "event_id": event.id,
                                "subscriptions_cleared": cleared,
                                "at": now.unix_timestamp(),
                            }),
                        ),
                    )
                    .await;
                Ok(WebhookDisposition::Applied)
            }
            other => {
                tracing::info!(event_type = other, "unhandled webhook type, ignoring");
                Ok(WebhookDisposition::Ignored)
            }
        }
    }

    /// Payment outcomes funnel into the ledger through reconciliation; a
    /// delivery without a payment ref carries nothing to reconcile and only
    /// moves tenant status.
    async fn ledger_payment(
        &self,
        event: &ProcessorEvent,
        tenant_id: uuid::Uuid,
        succeeded: bool,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        let Some(payment_ref) = event.data.payment_ref.as_deref() else {
            tracing::info!(event_id = %event.id, "payment event carries no payment ref");
            return Ok(());
        };
        let amount_cents = event.data.amount_cents.unwrap_or(0);
        self.reconcile
            .record_external_payment(tenant_id, payment_ref, amount_cents, succeeded, now)
            .await?;
        Ok(())
    }

    async fn record(&self, event: &ProcessorEvent, tenant_id: uuid::Uuid, summary: &str) {
        self.events
            .log(
                BillingEvent::new(BillingEventType::WebhookApplied, Some(tenant_id)).data(
                    serde_json::json!({
                        "event_id": event.id,
                        "event_type": event.event_type,
                        "summary": summary,
                        "payment_ref": event.data.payment_ref,
                        "amount_cents": event.data.amount_cents,
                    }),
                ),
            )
            .await;
    }
}
