//! Billing cycle engine
//!
//! Selects subscriptions whose paid period has lapsed and drives one
//! capture attempt per subscription. A failure for one subscription never
//! aborts the batch; the outcome is recorded and the loop moves on.

use std::sync::Arc;
use std::time::Instant;

use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::ledger::Ledger;
use crate::models::{BillingInterval, Subscription};
use crate::reconcile::ReconciliationService;

/// Advance a period anchor by one billing interval, preserving the
/// day-of-month where the target month allows it and clamping otherwise
/// (Jan 31 + 1 month lands on Feb 28, or Feb 29 in a leap year).
pub fn advance_period(interval: BillingInterval, from: OffsetDateTime) -> OffsetDateTime {
    let date = from.date();
    let next = match interval {
        BillingInterval::Monthly => {
            let (year, month) = match date.month() {
                Month::December => (date.year() + 1, Month::January),
                m => (date.year(), m.next()),
            };
            clamped_date(year, month, date.day())
        }
        BillingInterval::Yearly => clamped_date(date.year() + 1, date.month(), date.day()),
        BillingInterval::OneTime => return from,
    };
    from.replace_date(next)
}

fn clamped_date(year: i32, month: Month, day: u8) -> Date {
    let last = time::util::days_in_year_month(year, month);
    // day.min(last) is always valid for (year, month)
    Date::from_calendar_date(year, month, day.min(last))
        .unwrap_or_else(|_| Date::MIN)
}

/// Outcome of a single charge attempt within a batch run.
#[derive(Debug, serde::Serialize)]
pub struct ChargeOutcome {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub success: bool,
    pub amount_cents: Option<i64>,
    pub error: Option<String>,
}

/// Summary of one batch run, suitable for the API response and logs.
#[derive(Debug, Default, serde::Serialize)]
pub struct BillingRunReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<ChargeOutcome>,
}

pub struct BillingCycleEngine {
    ledger: Arc<dyn Ledger>,
    reconciler: Arc<ReconciliationService>,
}

impl BillingCycleEngine {
    pub fn new(ledger: Arc<dyn Ledger>, reconciler: Arc<ReconciliationService>) -> Self {
        Self { ledger, reconciler }
    }

    /// Subscriptions eligible for a charge attempt right now: active,
    /// card-on-file with a stored card, and past their period end.
    pub async fn select_due(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        self.ledger.list_due_subscriptions(now).await
    }

    /// Charge one subscription by id, regardless of schedule. Used by the
    /// manual trigger endpoint.
    pub async fn run_single(
        &self,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<ChargeOutcome> {
        let subscription = self
            .ledger
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))?;
        Ok(self.attempt(&subscription, now).await)
    }

    /// Run the full due batch. Each subscription is attempted in isolation;
    /// a decline or outage on one is recorded in its outcome and the batch
    /// continues. The deadline is checked between subscriptions, never
    /// mid-capture, so an expired run leaves no torn settlement: whatever
    /// was not reached stays due for the next scheduled run.
    pub async fn run_batch(
        &self,
        now: OffsetDateTime,
        deadline: std::time::Duration,
    ) -> BillingResult<BillingRunReport> {
        let due = self.select_due(now).await?;
        let started = Instant::now();
        let mut report = BillingRunReport::default();

        tracing::info!(due = due.len(), "starting billing batch");

        for subscription in &due {
            if started.elapsed() >= deadline {
                tracing::warn!(
                    deferred = due.len() - report.attempted,
                    deadline_secs = deadline.as_secs(),
                    "batch deadline reached, deferring remaining subscriptions"
                );
                break;
            }
            report.attempted += 1;
            let outcome = self.attempt(subscription, now).await;
            if outcome.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "billing batch complete"
        );
        Ok(report)
    }

    async fn attempt(&self, subscription: &Subscription, now: OffsetDateTime) -> ChargeOutcome {
        match self.reconciler.capture_subscription(subscription, now).await {
            Ok(record) => ChargeOutcome {
                subscription_id: subscription.id,
                tenant_id: subscription.tenant_id,
                success: true,
                amount_cents: Some(record.amount_cents),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    tenant_id = %subscription.tenant_id,
                    error = %e,
                    "subscription charge failed"
                );
                ChargeOutcome {
                    subscription_id: subscription.id,
                    tenant_id: subscription.tenant_id,
                    success: false,
                    amount_cents: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// The next charge is scheduled one interval after the period that just
/// lapsed, anchored at the moment of successful capture.
pub fn next_period(
    interval: BillingInterval,
    captured_at: OffsetDateTime,
) -> (OffsetDateTime, OffsetDateTime) {
    (captured_at, advance_period(interval, captured_at))
}

/// Grace window before a sent invoice is considered overdue.
pub const INVOICE_DUE_DAYS: i64 = 30;

pub fn default_due_date(now: OffsetDateTime) -> OffsetDateTime {
    now + Duration::days(INVOICE_DUE_DAYS)
}
