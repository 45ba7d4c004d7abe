//! Cancellation settlement
//!
//! Tenant deletion is a settlement, not just a row update: the final fee
//! is attempted first, but the deletion itself never blocks on it. A
//! declined card or a missing payment method is reported back in the
//! result while the tenant still goes away.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::ledger::Ledger;
use crate::models::SubscriptionStatus;
use crate::reconcile::{cancellation_fee_key, ReconciliationService};

#[derive(Debug, serde::Serialize)]
pub struct SettlementReport {
    pub success: bool,
    pub fee_charged: bool,
    pub fee_amount_cents: i64,
    pub charge_error: Option<String>,
}

pub struct SettlementService {
    ledger: Arc<dyn Ledger>,
    reconciler: Arc<ReconciliationService>,
    events: BillingEventLogger,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn Ledger>, reconciler: Arc<ReconciliationService>) -> Self {
        let events = BillingEventLogger::new(ledger.clone());
        Self {
            ledger,
            reconciler,
            events,
        }
    }

    /// Delete a tenant: attempt the cancellation fee, cancel every
    /// subscription, soft-delete the tenant record. Requires the delete
    /// capability; everything after the capability check is best effort
    /// on the money side and unconditional on the deletion side.
    pub async fn delete_tenant(
        &self,
        tenant_id: Uuid,
        reason: Option<&str>,
        can_delete: bool,
        now: OffsetDateTime,
    ) -> BillingResult<SettlementReport> {
        if !can_delete {
            return Err(BillingError::Authorization(
                "caller lacks the tenant delete capability".into(),
            ));
        }

        let tenant = self
            .ledger
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("tenant {tenant_id}")))?;
        if tenant.deleted_at.is_some() {
            return Err(BillingError::Conflict(format!(
                "tenant {tenant_id} is already deleted"
            )));
        }

        // Fee equals the current plan price; no plan means nothing to settle.
        let fee_amount = match tenant.subscription_plan {
            Some(plan_id) => self
                .ledger
                .get_plan(plan_id)
                .await?
                .map(|plan| plan.amount_cents)
                .unwrap_or(0),
            None => 0,
        };

        let (fee_charged, charge_error) = if fee_amount > 0 {
            match self
                .reconciler
                .capture_fee(
                    tenant_id,
                    fee_amount,
                    &cancellation_fee_key(tenant_id),
                    "cancellation fee",
                    now,
                )
                .await
            {
                Ok(_) => (true, None),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "cancellation fee not collected, continuing deletion"
                    );
                    (false, Some(e.to_string()))
                }
            }
        } else {
            (false, None)
        };

        for subscription in self.ledger.list_subscriptions_for_tenant(tenant_id).await? {
            if subscription.status != SubscriptionStatus::Cancelled {
                self.ledger
                    .set_subscription_status(subscription.id, SubscriptionStatus::Cancelled)
                    .await?;
            }
        }

        self.ledger.soft_delete_tenant(tenant_id, reason, now).await?;

        self.events
            .log(
                BillingEvent::new(BillingEventType::TenantDeleted, Some(tenant_id)).data(
                    serde_json::json!({
                        "reason": reason,
                        "fee_charged": fee_charged,
                        "fee_amount_cents": fee_amount,
                        "charge_error": charge_error,
                    }),
                ),
            )
            .await;

        tracing::info!(
            tenant_id = %tenant_id,
            fee_charged,
            fee_amount_cents = fee_amount,
            "tenant deleted"
        );

        Ok(SettlementReport {
            success: true,
            fee_charged,
            fee_amount_cents: fee_amount,
            charge_error,
        })
    }
}
