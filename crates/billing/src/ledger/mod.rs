//! Ledger store boundary
//!
//! The durable tables behind the engine, expressed as a trait so the
//! services can run against Postgres in production and an in-memory store in
//! tests. Both implementations enforce the same row-level uniqueness rules;
//! in Postgres they are backed by real constraints, which remain the last
//! line of idempotency defense.

mod memory;
mod pg;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::BillingEvent;
use crate::models::{
    Estimate, EstimateStatus, Invoice, InvoiceStatus, PaymentRecord, PaymentStatus, Plan,
    Subscription, SubscriptionStatus, Tenant, TenantStatus,
};

pub use memory::MemoryLedger;
pub use pg::PgLedger;

#[async_trait]
pub trait Ledger: Send + Sync {
    // --- tenants ---
    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<()>;
    async fn get_tenant(&self, id: Uuid) -> BillingResult<Option<Tenant>>;
    async fn find_tenant_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Option<Tenant>>;
    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> BillingResult<()>;
    /// Clear or replace the stored card reference.
    async fn set_tenant_card_ref(&self, id: Uuid, card_ref: Option<&str>) -> BillingResult<()>;
    /// Soft delete: sets `deleted_at`, `is_active = false` and the cancelled
    /// status in one statement so the tenant invariant cannot be observed
    /// half-applied.
    async fn soft_delete_tenant(
        &self,
        id: Uuid,
        reason: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<()>;

    // --- plans ---
    async fn insert_plan(&self, plan: &Plan) -> BillingResult<()>;
    async fn get_plan(&self, id: Uuid) -> BillingResult<Option<Plan>>;

    // --- subscriptions ---
    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()>;
    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;
    /// Pure read of charge-eligible subscriptions whose period has lapsed.
    /// Selection never mutates state.
    async fn list_due_subscriptions(&self, now: OffsetDateTime)
        -> BillingResult<Vec<Subscription>>;
    async fn list_subscriptions_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Vec<Subscription>>;
    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> BillingResult<()>;
    /// Advance the billing period and restore the subscription to active.
    /// Only a successful reconciliation calls this.
    async fn advance_subscription_period(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<()>;
    /// Clear card references for every subscription of a tenant, so future
    /// scheduled charges are skipped rather than failing. Returns the number
    /// of subscriptions touched.
    async fn clear_subscription_card_refs(&self, tenant_id: Uuid) -> BillingResult<u64>;

    // --- invoices ---
    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()>;
    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>>;
    async fn list_invoices_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<Invoice>>;
    /// Conditional state transition (check-then-act in one statement).
    /// Returns false when the invoice was not in `from`.
    async fn transition_invoice(
        &self,
        id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
        payment_ref: Option<&str>,
        payment_source: Option<&str>,
    ) -> BillingResult<bool>;

    // --- estimates ---
    async fn insert_estimate(&self, estimate: &Estimate) -> BillingResult<()>;
    async fn get_estimate(&self, id: Uuid) -> BillingResult<Option<Estimate>>;
    async fn transition_estimate(
        &self,
        id: Uuid,
        from: EstimateStatus,
        to: EstimateStatus,
    ) -> BillingResult<bool>;
    /// Atomic conversion: marks the estimate converted and inserts the new
    /// invoice only if the estimate is still accepted and unconverted.
    /// Returns false (and inserts nothing) otherwise.
    async fn convert_estimate(&self, estimate_id: Uuid, invoice: &Invoice) -> BillingResult<bool>;

    // --- payment records ---
    /// Find a prior record with the same derived idempotency key and status.
    async fn find_payment_by_key(
        &self,
        idempotency_key: &str,
        status: PaymentStatus,
    ) -> BillingResult<Option<PaymentRecord>>;
    /// Append exactly one record per attempt. If the processor payment ref
    /// already exists, the insert is a no-op and the canonical existing
    /// record is returned instead.
    async fn insert_payment(&self, record: &PaymentRecord) -> BillingResult<PaymentRecord>;
    async fn list_payments_for_tenant(&self, tenant_id: Uuid)
        -> BillingResult<Vec<PaymentRecord>>;

    // --- webhook events ---
    /// Atomically claim a processor event id for processing. Returns false
    /// when the event was already delivered (redelivery is a no-op). A claim
    /// whose processing failed stays re-claimable so the processor's
    /// at-least-once redelivery can retry it.
    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool>;
    async fn mark_webhook_event(
        &self,
        event_id: &str,
        disposition: &str,
        error: Option<&str>,
    ) -> BillingResult<()>;

    // --- audit log ---
    async fn append_billing_event(&self, event: &BillingEvent) -> BillingResult<()>;
}
