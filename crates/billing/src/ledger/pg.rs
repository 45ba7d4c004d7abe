//! Postgres ledger
//!
//! Status enums are TEXT columns parsed through the model `FromStr` impls;
//! line items are JSONB. Conditional transitions are single UPDATE
//! statements with the precondition in the WHERE clause, and estimate
//! conversion runs inside a transaction.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::BillingEvent;
use crate::models::{
    BillingInterval, Estimate, EstimateStatus, Invoice, InvoiceStatus, LineItem, PaymentMethod,
    PaymentRecord, PaymentStatus, Plan, ProcessorKind, Subscription, SubscriptionStatus, Tenant,
    TenantStatus,
};

use super::Ledger;

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: FromStr<Err = String>>(raw: &str) -> BillingResult<T> {
    raw.parse()
        .map_err(|e: String| BillingError::Database(format!("corrupt row: {e}")))
}

fn parse_items(raw: serde_json::Value) -> BillingResult<Vec<LineItem>> {
    serde_json::from_value(raw)
        .map_err(|e| BillingError::Database(format!("corrupt line items: {e}")))
}

fn items_json(items: &[LineItem]) -> BillingResult<serde_json::Value> {
    serde_json::to_value(items).map_err(|e| BillingError::Database(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    subscription_status: String,
    subscription_plan: Option<Uuid>,
    trial_ends_at: Option<OffsetDateTime>,
    processor_customer_ref: Option<String>,
    processor_card_ref: Option<String>,
    is_active: bool,
    deleted_at: Option<OffsetDateTime>,
}

impl TenantRow {
    fn into_model(self) -> BillingResult<Tenant> {
        Ok(Tenant {
            id: self.id,
            name: self.name,
            subscription_status: parse::<TenantStatus>(&self.subscription_status)?,
            subscription_plan: self.subscription_plan,
            trial_ends_at: self.trial_ends_at,
            processor_customer_ref: self.processor_customer_ref,
            processor_card_ref: self.processor_card_ref,
            is_active: self.is_active,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    tenant_id: Uuid,
    client_id: Uuid,
    plan_id: Uuid,
    payment_method: String,
    status: String,
    processor: String,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
    processor_card_ref: Option<String>,
}

impl SubscriptionRow {
    fn into_model(self) -> BillingResult<Subscription> {
        Ok(Subscription {
            id: self.id,
            tenant_id: self.tenant_id,
            client_id: self.client_id,
            plan_id: self.plan_id,
            payment_method: parse::<PaymentMethod>(&self.payment_method)?,
            status: parse::<SubscriptionStatus>(&self.status)?,
            processor: parse::<ProcessorKind>(&self.processor)?,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            processor_card_ref: self.processor_card_ref,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    tenant_id: Uuid,
    invoice_number: String,
    status: String,
    amount_cents: i64,
    due_date: OffsetDateTime,
    line_items: serde_json::Value,
    paid_at: Option<OffsetDateTime>,
    processor_payment_ref: Option<String>,
    payment_source: Option<String>,
    subscription_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl InvoiceRow {
    fn into_model(self) -> BillingResult<Invoice> {
        Ok(Invoice {
            id: self.id,
            tenant_id: self.tenant_id,
            invoice_number: self.invoice_number,
            status: parse::<InvoiceStatus>(&self.status)?,
            amount_cents: self.amount_cents,
            due_date: self.due_date,
            line_items: parse_items(self.line_items)?,
            paid_at: self.paid_at,
            processor_payment_ref: self.processor_payment_ref,
            payment_source: self.payment_source,
            subscription_id: self.subscription_id,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EstimateRow {
    id: Uuid,
    tenant_id: Uuid,
    estimate_number: String,
    status: String,
    amount_cents: i64,
    line_items: serde_json::Value,
    converted_to_invoice_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl EstimateRow {
    fn into_model(self) -> BillingResult<Estimate> {
        Ok(Estimate {
            id: self.id,
            tenant_id: self.tenant_id,
            estimate_number: self.estimate_number,
            status: parse::<EstimateStatus>(&self.status)?,
            amount_cents: self.amount_cents,
            line_items: parse_items(self.line_items)?,
            converted_to_invoice_id: self.converted_to_invoice_id,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: Uuid,
    amount_cents: i64,
    status: String,
    processor_payment_ref: Option<String>,
    idempotency_key: String,
    description: String,
    error: Option<String>,
    related_subscription_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl PaymentRow {
    fn into_model(self) -> BillingResult<PaymentRecord> {
        Ok(PaymentRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            amount_cents: self.amount_cents,
            status: parse::<PaymentStatus>(&self.status)?,
            processor_payment_ref: self.processor_payment_ref,
            idempotency_key: self.idempotency_key,
            description: self.description,
            error: self.error,
            related_subscription_id: self.related_subscription_id,
            created_at: self.created_at,
        })
    }
}

const TENANT_COLUMNS: &str = "id, name, subscription_status, subscription_plan, trial_ends_at, \
     processor_customer_ref, processor_card_ref, is_active, deleted_at";

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, client_id, plan_id, payment_method, status, \
     processor, current_period_start, current_period_end, processor_card_ref";

const INVOICE_COLUMNS: &str = "id, tenant_id, invoice_number, status, amount_cents, due_date, \
     line_items, paid_at, processor_payment_ref, payment_source, subscription_id, created_at";

const ESTIMATE_COLUMNS: &str = "id, tenant_id, estimate_number, status, amount_cents, \
     line_items, converted_to_invoice_id, created_at";

const PAYMENT_COLUMNS: &str = "id, tenant_id, amount_cents, status, processor_payment_ref, \
     idempotency_key, description, error, related_subscription_id, created_at";

#[async_trait]
impl Ledger for PgLedger {
    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants
                (id, name, subscription_status, subscription_plan, trial_ends_at,
                 processor_customer_ref, processor_card_ref, is_active, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(tenant.subscription_status.as_str())
        .bind(tenant.subscription_plan)
        .bind(tenant.trial_ends_at)
        .bind(&tenant.processor_customer_ref)
        .bind(&tenant.processor_card_ref)
        .bind(tenant.is_active)
        .bind(tenant.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TenantRow::into_model).transpose()
    }

    async fn find_tenant_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE processor_customer_ref = $1"
        ))
        .bind(customer_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TenantRow::into_model).transpose()
    }

    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> BillingResult<()> {
        let result =
            sqlx::query("UPDATE tenants SET subscription_status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("tenant {id}")));
        }
        Ok(())
    }

    async fn set_tenant_card_ref(&self, id: Uuid, card_ref: Option<&str>) -> BillingResult<()> {
        let result =
            sqlx::query("UPDATE tenants SET processor_card_ref = $1, updated_at = NOW() WHERE id = $2")
                .bind(card_ref)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("tenant {id}")));
        }
        Ok(())
    }

    async fn soft_delete_tenant(
        &self,
        id: Uuid,
        reason: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET deleted_at = $1,
                is_active = false,
                subscription_status = 'cancelled',
                deletion_reason = $2,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(now)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("tenant {id}")));
        }
        Ok(())
    }

    async fn insert_plan(&self, plan: &Plan) -> BillingResult<()> {
        sqlx::query(
            "INSERT INTO plans (id, name, amount_cents, billing_interval) VALUES ($1, $2, $3, $4)",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.amount_cents)
        .bind(plan.billing_interval.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> BillingResult<Option<Plan>> {
        let row: Option<(Uuid, String, i64, String)> = sqlx::query_as(
            "SELECT id, name, amount_cents, billing_interval FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(id, name, amount_cents, interval)| {
            Ok(Plan {
                id,
                name,
                amount_cents,
                billing_interval: parse::<BillingInterval>(&interval)?,
            })
        })
        .transpose()
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, tenant_id, client_id, plan_id, payment_method, status, processor,
                 current_period_start, current_period_end, processor_card_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id)
        .bind(subscription.client_id)
        .bind(subscription.plan_id)
        .bind(subscription.payment_method.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.processor.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(&subscription.processor_card_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_model).transpose()
    }

    async fn list_due_subscriptions(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE status IN ('active', 'payment_failed')
              AND payment_method = 'card_on_file'
              AND processor_card_ref IS NOT NULL
              AND current_period_end < $1
            ORDER BY current_period_end
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionRow::into_model).collect()
    }

    async fn list_subscriptions_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionRow::into_model).collect()
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> BillingResult<()> {
        let result =
            sqlx::query("UPDATE subscriptions SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    async fn advance_subscription_period(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET current_period_start = $1,
                current_period_end = $2,
                status = 'active',
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(period_start)
        .bind(period_end)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    async fn clear_subscription_card_refs(&self, tenant_id: Uuid) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET processor_card_ref = NULL, updated_at = NOW()
            WHERE tenant_id = $1 AND processor_card_ref IS NOT NULL
            "#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, tenant_id, invoice_number, status, amount_cents, due_date, line_items,
                 paid_at, processor_payment_ref, payment_source, subscription_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.tenant_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.status.as_str())
        .bind(invoice.amount_cents)
        .bind(invoice.due_date)
        .bind(items_json(&invoice.line_items)?)
        .bind(invoice.paid_at)
        .bind(&invoice.processor_payment_ref)
        .bind(&invoice.payment_source)
        .bind(invoice.subscription_id)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InvoiceRow::into_model).transpose()
    }

    async fn list_invoices_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 ORDER BY created_at"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InvoiceRow::into_model).collect()
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
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1,
                paid_at = COALESCE($2, paid_at),
                processor_payment_ref = COALESCE($3, processor_payment_ref),
                payment_source = COALESCE($4, payment_source),
                updated_at = NOW()
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(to.as_str())
        .bind(paid_at)
        .bind(payment_ref)
        .bind(payment_source)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_estimate(&self, estimate: &Estimate) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO estimates
                (id, tenant_id, estimate_number, status, amount_cents, line_items,
                 converted_to_invoice_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(estimate.id)
        .bind(estimate.tenant_id)
        .bind(&estimate.estimate_number)
        .bind(estimate.status.as_str())
        .bind(estimate.amount_cents)
        .bind(items_json(&estimate.line_items)?)
        .bind(estimate.converted_to_invoice_id)
        .bind(estimate.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_estimate(&self, id: Uuid) -> BillingResult<Option<Estimate>> {
        let row: Option<EstimateRow> = sqlx::query_as(&format!(
            "SELECT {ESTIMATE_COLUMNS} FROM estimates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EstimateRow::into_model).transpose()
    }

    async fn transition_estimate(
        &self,
        id: Uuid,
        from: EstimateStatus,
        to: EstimateStatus,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE estimates SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn convert_estimate(&self, estimate_id: Uuid, invoice: &Invoice) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Check-then-act in one statement; a concurrent conversion loses here.
        let claimed = sqlx::query(
            r#"
            UPDATE estimates
            SET status = 'converted',
                converted_to_invoice_id = $1,
                updated_at = NOW()
            WHERE id = $2
              AND status = 'accepted'
              AND converted_to_invoice_id IS NULL
            "#,
        )
        .bind(invoice.id)
        .bind(estimate_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, tenant_id, invoice_number, status, amount_cents, due_date, line_items,
                 paid_at, processor_payment_ref, payment_source, subscription_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.tenant_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.status.as_str())
        .bind(invoice.amount_cents)
        .bind(invoice.due_date)
        .bind(items_json(&invoice.line_items)?)
        .bind(invoice.paid_at)
        .bind(&invoice.processor_payment_ref)
        .bind(&invoice.payment_source)
        .bind(invoice.subscription_id)
        .bind(invoice.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_payment_by_key(
        &self,
        idempotency_key: &str,
        status: PaymentStatus,
    ) -> BillingResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payment_records
            WHERE idempotency_key = $1 AND status = $2
            ORDER BY created_at
            LIMIT 1
            "#
        ))
        .bind(idempotency_key)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRow::into_model).transpose()
    }

    async fn insert_payment(&self, record: &PaymentRecord) -> BillingResult<PaymentRecord> {
        let inserted: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_records
                (id, tenant_id, amount_cents, status, processor_payment_ref,
                 idempotency_key, description, error, related_subscription_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (processor_payment_ref) WHERE processor_payment_ref IS NOT NULL
            DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.amount_cents)
        .bind(record.status.as_str())
        .bind(&record.processor_payment_ref)
        .bind(&record.idempotency_key)
        .bind(&record.description)
        .bind(&record.error)
        .bind(record.related_subscription_id)
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.into_model();
        }

        // Conflict: the earlier record with this processor ref is canonical.
        let existing: PaymentRow = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE processor_payment_ref = $1"
        ))
        .bind(&record.processor_payment_ref)
        .fetch_one(&self.pool)
        .await?;
        existing.into_model()
    }

    async fn list_payments_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE tenant_id = $1 ORDER BY created_at"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PaymentRow::into_model).collect()
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        // Atomic claim: only one delivery of a given event id gets a row
        // back. A prior claim that ended in 'failed' is taken over so the
        // redelivery can retry it.
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, disposition, received_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (event_id) DO UPDATE
            SET disposition = 'processing', error_message = NULL, received_at = NOW()
            WHERE webhook_events.disposition = 'failed'
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_webhook_event(
        &self,
        event_id: &str,
        disposition: &str,
        error: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET disposition = $1, error_message = $2 WHERE event_id = $3",
        )
        .bind(disposition)
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_billing_event(&self, event: &BillingEvent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events (id, tenant_id, event_type, data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
