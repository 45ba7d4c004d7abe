//! Outbound notifications. Delivery is best effort: a failure here is
//! logged and never rolls back the billing write that triggered it.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn payment_receipt(
        &self,
        tenant_id: Uuid,
        amount_cents: i64,
        description: &str,
    ) -> Result<(), String>;

    async fn payment_failed(
        &self,
        tenant_id: Uuid,
        amount_cents: i64,
        reason: &str,
    ) -> Result<(), String>;

    async fn invoice_sent(&self, tenant_id: Uuid, invoice_number: &str) -> Result<(), String>;
}

/// Default port: writes notifications to the log. A real mail or push
/// integration slots in behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn payment_receipt(
        &self,
        tenant_id: Uuid,
        amount_cents: i64,
        description: &str,
    ) -> Result<(), String> {
        tracing::info!(
            tenant_id = %tenant_id,
            amount = fieldpay_shared::format_cents(amount_cents),
            description,
            "payment receipt"
        );
        Ok(())
    }

    async fn payment_failed(
        &self,
        tenant_id: Uuid,
        amount_cents: i64,
        reason: &str,
    ) -> Result<(), String> {
        tracing::info!(
            tenant_id = %tenant_id,
            amount = fieldpay_shared::format_cents(amount_cents),
            reason,
            "payment failure notice"
        );
        Ok(())
    }

    async fn invoice_sent(&self, tenant_id: Uuid, invoice_number: &str) -> Result<(), String> {
        tracing::info!(tenant_id = %tenant_id, invoice_number, "invoice sent notice");
        Ok(())
    }
}
