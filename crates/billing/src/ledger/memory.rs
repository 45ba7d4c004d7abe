//! In-memory ledger for deterministic tests
//!
//! Mirrors the Postgres implementation's semantics, including the uniqueness
//! rules on `processor_payment_ref`, `invoice_number` and webhook event ids.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::BillingEvent;
use crate::models::{
    Estimate, EstimateStatus, Invoice, InvoiceStatus, PaymentRecord, PaymentStatus, Plan,
    Subscription, SubscriptionStatus, Tenant, TenantStatus,
};

use super::Ledger;

#[derive(Default)]
struct Store {
    tenants: HashMap<Uuid, Tenant>,
    plans: HashMap<Uuid, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: HashMap<Uuid, Invoice>,
    estimates: HashMap<Uuid, Estimate>,
    payments: Vec<PaymentRecord>,
    webhook_events: HashMap<String, (String, String, Option<String>)>,
    billing_events: Vec<BillingEvent>,
}

#[derive(Default)]
pub struct MemoryLedger {
    store: Mutex<Store>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BillingResult<std::sync::MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| BillingError::Database("memory ledger poisoned".to_string()))
    }

    /// Test helper: total number of payment records.
    pub fn payment_count(&self) -> usize {
        self.store.lock().map(|s| s.payments.len()).unwrap_or(0)
    }

    /// Test helper: number of appended audit events.
    pub fn billing_event_count(&self) -> usize {
        self.store
            .lock()
            .map(|s| s.billing_events.len())
            .unwrap_or(0)
    }

    /// Test helper: number of stored invoices.
    pub fn invoice_count(&self) -> usize {
        self.store.lock().map(|s| s.invoices.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<()> {
        self.lock()?.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> BillingResult<Option<Tenant>> {
        Ok(self.lock()?.tenants.get(&id).cloned())
    }

    async fn find_tenant_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Option<Tenant>> {
        Ok(self
            .lock()?
            .tenants
            .values()
            .find(|t| t.processor_customer_ref.as_deref() == Some(customer_ref))
            .cloned())
    }

    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> BillingResult<()> {
        let mut store = self.lock()?;
        match store.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.subscription_status = status;
                Ok(())
            }
            None => Err(BillingError::NotFound(format!("tenant {id}"))),
        }
    }

    async fn set_tenant_card_ref(&self, id: Uuid, card_ref: Option<&str>) -> BillingResult<()> {
        let mut store = self.lock()?;
        match store.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.processor_card_ref = card_ref.map(str::to_string);
                Ok(())
            }
            None => Err(BillingError::NotFound(format!("tenant {id}"))),
        }
    }

    async fn soft_delete_tenant(
        &self,
        id: Uuid,
        _reason: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut store = self.lock()?;
        match store.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.deleted_at = Some(now);
                tenant.is_active = false;
                tenant.subscription_status = TenantStatus::Cancelled;
                Ok(())
            }
            None => Err(BillingError::NotFound(format!("tenant {id}"))),
        }
    }

    async fn insert_plan(&self, plan: &Plan) -> BillingResult<()> {
        self.lock()?.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> BillingResult<Option<Plan>> {
        Ok(self.lock()?.plans.get(&id).cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        self.lock()?
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(&id).cloned())
    }

    async fn list_due_subscriptions(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let store = self.lock()?;
        let mut due: Vec<Subscription> = store
            .subscriptions
            .values()
            .filter(|s| s.charge_eligible() && s.current_period_end < now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        Ok(due)
    }

    async fn list_subscriptions_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> BillingResult<()> {
        let mut store = self.lock()?;
        match store.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.status = status;
                Ok(())
            }
            None => Err(BillingError::NotFound(format!("subscription {id}"))),
        }
    }

    async fn advance_subscription_period(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut store = self.lock()?;
        match store.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.current_period_start = period_start;
                sub.current_period_end = period_end;
                sub.status = SubscriptionStatus::Active;
                Ok(())
            }
            None => Err(BillingError::NotFound(format!("subscription {id}"))),
        }
    }

    async fn clear_subscription_card_refs(&self, tenant_id: Uuid) -> BillingResult<u64> {
        let mut store = self.lock()?;
        let mut touched = 0;
        for sub in store.subscriptions.values_mut() {
            if sub.tenant_id == tenant_id && sub.processor_card_ref.is_some() {
                sub.processor_card_ref = None;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        let mut store = self.lock()?;
        if store
            .invoices
            .values()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(BillingError::Conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number
            )));
        }
        store.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.lock()?.invoices.get(&id).cloned())
    }

    async fn list_invoices_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<Invoice>> {
        let store = self.lock()?;
        let mut invoices: Vec<Invoice> = store
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_at);
        Ok(invoices)
    }

    async fn transition_invoice(
        &self,
        id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
        payment_ref: Option<&str>,
        payment_source: Option<&str>,
    ) -> BillingResult<bool> {
        let mut store = self.lock()?;
        let Some(invoice) = store.invoices.get_mut(&id) else {
            return Ok(false);
        };
        if invoice.status != from {
            return Ok(false);
        }
        invoice.status = to;
        if paid_at.is_some() {
            invoice.paid_at = paid_at;
        }
        if payment_ref.is_some() {
            invoice.processor_payment_ref = payment_ref.map(str::to_string);
        }
        if payment_source.is_some() {
            invoice.payment_source = payment_source.map(str::to_string);
        }
        Ok(true)
    }

    async fn insert_estimate(&self, estimate: &Estimate) -> BillingResult<()> {
        self.lock()?
            .estimates
            .insert(estimate.id, estimate.clone());
        Ok(())
    }

    async fn get_estimate(&self, id: Uuid) -> BillingResult<Option<Estimate>> {
        Ok(self.lock()?.estimates.get(&id).cloned())
    }

    async fn transition_estimate(
        &self,
        id: Uuid,
        from: EstimateStatus,
        to: EstimateStatus,
    ) -> BillingResult<bool> {
        let mut store = self.lock()?;
        let Some(estimate) = store.estimates.get_mut(&id) else {
            return Ok(false);
        };
        if estimate.status != from {
            return Ok(false);
        }
        estimate.status = to;
        Ok(true)
    }

    async fn convert_estimate(&self, estimate_id: Uuid, invoice: &Invoice) -> BillingResult<bool> {
        let mut store = self.lock()?;
        // Check-then-act under the single store lock, like the conditional
        // UPDATE inside a transaction in Postgres.
        let eligible = matches!(
            store.estimates.get(&estimate_id),
            Some(e) if e.status == EstimateStatus::Accepted && e.converted_to_invoice_id.is_none()
        );
        if !eligible {
            return Ok(false);
        }
        if let Some(estimate) = store.estimates.get_mut(&estimate_id) {
            estimate.status = EstimateStatus::Converted;
            estimate.converted_to_invoice_id = Some(invoice.id);
        }
        store.invoices.insert(invoice.id, invoice.clone());
        Ok(true)
    }

    async fn find_payment_by_key(
        &self,
        idempotency_key: &str,
        status: PaymentStatus,
    ) -> BillingResult<Option<PaymentRecord>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .find(|p| p.idempotency_key == idempotency_key && p.status == status)
            .cloned())
    }

    async fn insert_payment(&self, record: &PaymentRecord) -> BillingResult<PaymentRecord> {
        let mut store = self.lock()?;
        if let Some(payment_ref) = record.processor_payment_ref.as_deref() {
            if let Some(existing) = store
                .payments
                .iter()
                .find(|p| p.processor_payment_ref.as_deref() == Some(payment_ref))
            {
                // Unique constraint on processor_payment_ref: the earlier
                // record is canonical.
                return Ok(existing.clone());
            }
        }
        store.payments.push(record.clone());
        Ok(record.clone())
    }

    async fn list_payments_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Vec<PaymentRecord>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        let mut store = self.lock()?;
        // Failed claims are re-claimable; everything else is settled.
        if let Some((_, disposition, _)) = store.webhook_events.get(event_id) {
            if disposition != "failed" {
                return Ok(false);
            }
        }
        store.webhook_events.insert(
            event_id.to_string(),
            (event_type.to_string(), "processing".to_string(), None),
        );
        Ok(true)
    }

    async fn mark_webhook_event(
        &self,
        event_id: &str,
        disposition: &str,
        error: Option<&str>,
    ) -> BillingResult<()> {
        let mut store = self.lock()?;
        if let Some(entry) = store.webhook_events.get_mut(event_id) {
            entry.1 = disposition.to_string();
            entry.2 = error.map(str::to_string);
        }
        Ok(())
    }

    async fn append_billing_event(&self, event: &BillingEvent) -> BillingResult<()> {
        self.lock()?.billing_events.push(event.clone());
        Ok(())
    }
}
