// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Engine
//!
//! Exercises the boundary conditions that matter for money movement:
//! - Charge idempotency under retries and replays
//! - Batch isolation when one subscription fails
//! - Calendar clamping on period advancement
//! - Webhook signature rejection and event dedup
//! - Document state machine terminal states
//! - Cancellation settlement when the fee cannot be collected

use std::sync::Arc;

use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, ProcessorFailure};
use crate::ledger::{Ledger, MemoryLedger};
use crate::models::*;
use crate::notify::test_support::RecordingNotifier;
use crate::processors::{FakeProcessor, ProcessorSet};
use crate::reconcile::subscription_charge_key;
use crate::webhooks::WebhookDisposition;
use crate::BillingService;

struct Harness {
    service: BillingService,
    ledger: Arc<MemoryLedger>,
    card: Arc<FakeProcessor>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let card = Arc::new(FakeProcessor::new(ProcessorKind::CardOnFile));
    let order = Arc::new(FakeProcessor::new(ProcessorKind::RedirectOrder));
    let notifier = Arc::new(RecordingNotifier::default());
    let processors = ProcessorSet {
        card_on_file: card.clone(),
        redirect_order: order,
    };
    let service = BillingService::with_parts(ledger.clone(), processors, notifier.clone());
    Harness {
        service,
        ledger,
        card,
        notifier,
    }
}

async fn seed_plan(ledger: &dyn Ledger, amount_cents: i64) -> Plan {
    let plan = Plan {
        id: Uuid::new_v4(),
        name: "Pro".to_string(),
        amount_cents,
        billing_interval: BillingInterval::Monthly,
    };
    ledger.insert_plan(&plan).await.unwrap();
    plan
}

async fn seed_tenant(ledger: &dyn Ledger, plan: &Plan, card_ref: Option<&str>) -> Tenant {
    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: "Acme Plumbing".to_string(),
        subscription_status: TenantStatus::Active,
        subscription_plan: Some(plan.id),
        trial_ends_at: None,
        processor_customer_ref: Some(format!("cus_{}", Uuid::new_v4().simple())),
        processor_card_ref: card_ref.map(str::to_string),
        is_active: true,
        deleted_at: None,
    };
    ledger.insert_tenant(&tenant).await.unwrap();
    tenant
}

async fn seed_subscription(
    ledger: &dyn Ledger,
    tenant: &Tenant,
    plan: &Plan,
    period_end: OffsetDateTime,
    card_ref: &str,
) -> Subscription {
    let subscription = Subscription {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        client_id: Uuid::new_v4(),
        plan_id: plan.id,
        payment_method: PaymentMethod::CardOnFile,
        status: SubscriptionStatus::Active,
        processor: ProcessorKind::CardOnFile,
        current_period_start: period_end - Duration::days(30),
        current_period_end: period_end,
        processor_card_ref: Some(card_ref.to_string()),
    };
    ledger.insert_subscription(&subscription).await.unwrap();
    subscription
}

mod charge_idempotency {
    use super::*;

    #[tokio::test]
    async fn retry_of_same_period_never_double_charges() {
        let h = harness();
        let now = datetime!(2026-03-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_a")
                .await;

        let first = h.service.reconcile.capture_subscription(&sub, now).await.unwrap();
        // Retry with the same period snapshot (crash-replay of the batch).
        let second = h.service.reconcile.capture_subscription(&sub, now).await.unwrap();

        assert_eq!(first.id, second.id, "retry must return the canonical record");
        assert_eq!(h.card.capture_call_count(), 1);
        assert_eq!(h.ledger.payment_count(), 1);
    }

    #[tokio::test]
    async fn next_period_uses_a_fresh_key() {
        let h = harness();
        let now = datetime!(2026-03-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_a")
                .await;

        h.service.reconcile.capture_subscription(&sub, now).await.unwrap();

        let advanced = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_ne!(
            subscription_charge_key(sub.id, sub.current_period_start),
            subscription_charge_key(advanced.id, advanced.current_period_start),
        );

        // A month later the advanced subscription charges again.
        let later = advanced.current_period_end + Duration::hours(1);
        h.service.reconcile.capture_subscription(&advanced, later).await.unwrap();
        assert_eq!(h.card.capture_call_count(), 2);
        assert_eq!(h.ledger.payment_count(), 2);
    }

    #[tokio::test]
    async fn successful_renewal_advances_period_and_writes_paid_invoice() {
        let h = harness();
        let now = datetime!(2026-01-31 09:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 9900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::hours(2), "card_a")
                .await;

        let record = h.service.reconcile.capture_subscription(&sub, now).await.unwrap();
        assert_eq!(record.amount_cents, 9900);
        assert_eq!(record.status, PaymentStatus::Succeeded);

        let advanced = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(advanced.current_period_start, now);
        // Jan 31 anchor clamps to the end of February.
        assert_eq!(
            advanced.current_period_end.date(),
            time::macros::date!(2026 - 02 - 28)
        );
        assert_eq!(advanced.status, SubscriptionStatus::Active);

        let invoices = h.ledger.list_invoices_for_tenant(tenant.id).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(invoices[0].amount_cents, 9900);
        assert_eq!(invoices[0].subscription_id, Some(sub.id));

        let receipts = h.notifier.receipts.lock().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0], (tenant.id, 9900));
    }

    #[tokio::test]
    async fn timeout_is_a_failure_outcome_and_period_stays_put() {
        let h = harness();
        let now = datetime!(2026-03-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_slow")).await;
        let sub = seed_subscription(
            h.ledger.as_ref(),
            &tenant,
            &plan,
            now - Duration::days(2),
            "card_slow",
        )
        .await;
        h.card.fail_token("card_slow", ProcessorFailure::Timeout);

        let err = h.service.reconcile.capture_subscription(&sub, now).await.unwrap_err();
        assert!(matches!(
            err,
            BillingError::Processor(ProcessorFailure::Timeout)
        ));

        let stored = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PaymentFailed);
        assert_eq!(stored.current_period_end, sub.current_period_end);

        let payments = h.ledger.list_payments_for_tenant(tenant.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert_eq!(payments[0].error.as_deref(), Some("processor timeout"));

        let tenant = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(tenant.subscription_status, TenantStatus::PaymentFailed);
    }

    #[tokio::test]
    async fn failed_subscription_heals_on_the_next_cycle() {
        let h = harness();
        let now = datetime!(2026-03-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_a")
                .await;

        h.card.fail_token("card_a", ProcessorFailure::Declined {
            code: "insufficient_funds".into(),
            message: "card declined".into(),
        });
        h.service.reconcile.capture_subscription(&sub, now).await.unwrap_err();

        // Card topped up; the next batch still selects this subscription.
        h.card.clear_failures();
        let due = h.service.cycle.select_due(now + Duration::days(1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, SubscriptionStatus::PaymentFailed);

        let report = h
            .service
            .cycle
            .run_batch(now + Duration::days(1), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);

        let healed = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(healed.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn interrupted_settlement_is_finished_on_retry() {
        let h = harness();
        let now = datetime!(2026-03-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_a")
                .await;

        // A prior run settled the payment but died before the period moved:
        // the succeeded record exists under this period's key, the
        // subscription still looks due.
        h.ledger
            .insert_payment(&PaymentRecord {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                amount_cents: 4900,
                status: PaymentStatus::Succeeded,
                processor_payment_ref: Some("pay_interrupted".to_string()),
                idempotency_key: subscription_charge_key(sub.id, sub.current_period_start),
                description: "Pro subscription renewal".to_string(),
                error: None,
                related_subscription_id: Some(sub.id),
                created_at: now - Duration::hours(2),
            })
            .await
            .unwrap();

        let outcome = h.service.cycle.run_single(sub.id, now).await.unwrap();
        assert!(outcome.success);

        // No second charge, and the period finally advanced.
        assert_eq!(h.card.capture_call_count(), 0);
        assert_eq!(h.ledger.payment_count(), 1);
        let stored = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert!(stored.current_period_end > now);
        assert_eq!(stored.status, SubscriptionStatus::Active);

        // With the period advanced, the due scan leaves it alone.
        let due = h.service.cycle.select_due(now).await.unwrap();
        assert!(due.is_empty());
    }
}

mod batch_isolation {
    use super::*;

    #[tokio::test]
    async fn one_declined_card_never_stops_the_batch() {
        let h = harness();
        let now = datetime!(2026-04-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;

        let mut subs = Vec::new();
        for card in ["card_1", "card_bad", "card_3"] {
            let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some(card)).await;
            let days = 1 + subs.len() as i64;
            subs.push(
                seed_subscription(
                    h.ledger.as_ref(),
                    &tenant,
                    &plan,
                    now - Duration::days(days),
                    card,
                )
                .await,
            );
        }
        h.card.fail_token("card_bad", ProcessorFailure::Declined {
            code: "do_not_honor".into(),
            message: "card declined".into(),
        });

        let report = h
            .service
            .cycle
            .run_batch(now, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        let failed: Vec<_> = report.outcomes.iter().filter(|o| !o.success).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("declined"));

        // The two good subscriptions advanced; the bad one did not.
        for sub in &subs {
            let stored = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
            if stored.processor_card_ref.as_deref() == Some("card_bad") {
                assert_eq!(stored.current_period_end, sub.current_period_end);
            } else {
                assert!(stored.current_period_end > now);
            }
        }
    }

    #[tokio::test]
    async fn due_selection_skips_future_periods_and_missing_cards() {
        let h = harness();
        let now = datetime!(2026-04-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;

        let due_tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_1")).await;
        let due = seed_subscription(
            h.ledger.as_ref(),
            &due_tenant,
            &plan,
            now - Duration::hours(1),
            "card_1",
        )
        .await;

        let future_tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_2")).await;
        seed_subscription(
            h.ledger.as_ref(),
            &future_tenant,
            &plan,
            now + Duration::days(10),
            "card_2",
        )
        .await;

        // Lapsed but cardless: seeded with a card, then cleared the way a
        // card.disabled webhook would.
        let cardless_tenant = seed_tenant(h.ledger.as_ref(), &plan, None).await;
        seed_subscription(
            h.ledger.as_ref(),
            &cardless_tenant,
            &plan,
            now - Duration::days(3),
            "card_x",
        )
        .await;
        h.ledger
            .clear_subscription_card_refs(cardless_tenant.id)
            .await
            .unwrap();

        let selected = h.service.cycle.select_due(now).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, due.id);
    }

    #[tokio::test]
    async fn expired_deadline_defers_the_whole_batch() {
        let h = harness();
        let now = datetime!(2026-04-01 06:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_1")).await;
        let sub =
            seed_subscription(h.ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_1")
                .await;

        // A deadline of zero expires before the first subscription; nothing
        // is charged and everything stays due.
        let report = h
            .service
            .cycle
            .run_batch(now, std::time::Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert!(report.outcomes.is_empty());
        assert_eq!(h.ledger.payment_count(), 0);

        let stored = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.current_period_end, sub.current_period_end);

        // The next run with a real deadline picks it up.
        let report = h
            .service
            .cycle
            .run_batch(now, std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
    }
}

mod webhook_gateway {
    use super::*;

    fn payment_completed_body(event_id: &str, customer_ref: &str) -> String {
        serde_json::json!({
            "id": event_id,
            "type": "payment.completed",
            "data": { "customer_ref": customer_ref, "payment_ref": "pay_w1", "amount_cents": 4900 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn replayed_event_applies_once() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let mut tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        tenant.subscription_status = TenantStatus::PaymentFailed;
        h.ledger
            .set_tenant_status(tenant.id, TenantStatus::PaymentFailed)
            .await
            .unwrap();

        let body = payment_completed_body(
            "evt_001",
            tenant.processor_customer_ref.as_deref().unwrap(),
        );
        let sig = h.card.sign_webhook(&body);

        let first = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(first.disposition, WebhookDisposition::Applied);
        assert_eq!(h.ledger.payment_count(), 1);

        let events_after_first = h.ledger.billing_event_count();
        let second = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(second.disposition, WebhookDisposition::Duplicate);
        assert_eq!(h.ledger.billing_event_count(), events_after_first);
        assert_eq!(h.ledger.payment_count(), 1);

        let stored = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, TenantStatus::Active);
        let payments = h.ledger.list_payments_for_tenant(tenant.id).await.unwrap();
        assert_eq!(payments[0].processor_payment_ref.as_deref(), Some("pay_w1"));
        assert_eq!(payments[0].amount_cents, 4900);
        assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn tampered_signature_leaves_no_trace() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;

        let body = payment_completed_body(
            "evt_002",
            tenant.processor_customer_ref.as_deref().unwrap(),
        );
        let sig = h.card.sign_webhook(&body);
        let tampered = body.replace("4900", "1");

        let err = h.service.webhooks.ingest(&tampered, &sig, now).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
        assert_eq!(h.ledger.billing_event_count(), 0);

        // The same event id is still claimable by a correctly signed delivery.
        let good_sig = h.card.sign_webhook(&body);
        let receipt = h.service.webhooks.ingest(&body, &good_sig, now).await.unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Applied);
    }

    #[tokio::test]
    async fn unknown_tenant_and_unknown_type_are_acknowledged() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);

        let unknown_tenant = payment_completed_body("evt_003", "cus_nobody");
        let sig = h.card.sign_webhook(&unknown_tenant);
        let receipt = h
            .service
            .webhooks
            .ingest(&unknown_tenant, &sig, now)
            .await
            .unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Ignored);

        let unknown_type = serde_json::json!({
            "id": "evt_004",
            "type": "dispute.opened",
            "data": { "customer_ref": "cus_nobody" }
        })
        .to_string();
        let sig = h.card.sign_webhook(&unknown_type);
        let receipt = h
            .service
            .webhooks
            .ingest(&unknown_type, &sig, now)
            .await
            .unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Ignored);
    }

    #[tokio::test]
    async fn card_disabled_clears_tenant_and_subscription_refs() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub = seed_subscription(
            h.ledger.as_ref(),
            &tenant,
            &plan,
            now + Duration::days(10),
            "card_a",
        )
        .await;

        let body = serde_json::json!({
            "id": "evt_005",
            "type": "card.disabled",
            "data": { "customer_ref": tenant.processor_customer_ref }
        })
        .to_string();
        let sig = h.card.sign_webhook(&body);
        let receipt = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Applied);

        let stored_tenant = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored_tenant.processor_card_ref, None);
        let stored_sub = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored_sub.processor_card_ref, None);
        assert!(!stored_sub.charge_eligible());
    }

    #[tokio::test]
    async fn missing_webhook_key_aborts_before_any_write() {
        let ledger = Arc::new(MemoryLedger::new());
        let card = Arc::new(FakeProcessor::without_webhook_key(ProcessorKind::CardOnFile));
        let order = Arc::new(FakeProcessor::new(ProcessorKind::RedirectOrder));
        let processors = ProcessorSet {
            card_on_file: card.clone(),
            redirect_order: order,
        };
        let service = BillingService::with_parts(
            ledger.clone(),
            processors,
            Arc::new(RecordingNotifier::default()),
        );

        let body = payment_completed_body("evt_006", "cus_any");
        let err = service
            .webhooks
            .ingest(&body, "sig", datetime!(2026-05-01 00:00 UTC))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Configuration(_)));
        assert_eq!(ledger.billing_event_count(), 0);
    }

    #[tokio::test]
    async fn failed_processing_is_retried_on_redelivery() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;

        // A prior delivery claimed the event but its processing died.
        h.ledger
            .claim_webhook_event("evt_010", "payment.completed")
            .await
            .unwrap();
        h.ledger
            .mark_webhook_event("evt_010", "failed", Some("ledger write lost"))
            .await
            .unwrap();

        let body = payment_completed_body(
            "evt_010",
            tenant.processor_customer_ref.as_deref().unwrap(),
        );
        let sig = h.card.sign_webhook(&body);
        let receipt = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Applied);
        assert_eq!(h.ledger.payment_count(), 1);

        // Once applied, the claim is settled for good.
        let replay = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(replay.disposition, WebhookDisposition::Duplicate);
    }

    #[tokio::test]
    async fn late_payment_never_reactivates_a_deleted_tenant() {
        let h = harness();
        let now = datetime!(2026-05-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        h.ledger
            .soft_delete_tenant(tenant.id, Some("closed shop"), now)
            .await
            .unwrap();

        let body = payment_completed_body(
            "evt_011",
            tenant.processor_customer_ref.as_deref().unwrap(),
        );
        let sig = h.card.sign_webhook(&body);
        let receipt = h.service.webhooks.ingest(&body, &sig, now).await.unwrap();
        assert_eq!(receipt.disposition, WebhookDisposition::Applied);

        // The payment is on the books, the tenant stays cancelled.
        assert_eq!(h.ledger.payment_count(), 1);
        let stored = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, TenantStatus::Cancelled);
        assert!(stored.deleted_at.is_some());
    }
}

mod document_lifecycle {
    use super::*;

    fn items() -> Vec<LineItem> {
        vec![LineItem {
            description: "Drain cleaning".into(),
            quantity: 2,
            unit_amount_cents: 7500,
        }]
    }

    #[tokio::test]
    async fn estimate_converts_exactly_once() {
        let h = harness();
        let now = datetime!(2026-06-01 10:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;

        let estimate = h
            .service
            .documents
            .create_estimate(tenant.id, items(), now)
            .await
            .unwrap();
        h.service.documents.send_estimate(estimate.id).await.unwrap();
        h.service.documents.accept_estimate(estimate.id).await.unwrap();

        let invoice = h
            .service
            .documents
            .convert_to_invoice(estimate.id, now)
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.amount_cents, 15000);
        assert_eq!(invoice.line_items, estimate.line_items);

        let err = h
            .service
            .documents
            .convert_to_invoice(estimate.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
        assert_eq!(h.ledger.invoice_count(), 1);

        let stored = h.ledger.get_estimate(estimate.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EstimateStatus::Converted);
        assert_eq!(stored.converted_to_invoice_id, Some(invoice.id));
    }

    #[tokio::test]
    async fn declined_estimate_never_converts() {
        let h = harness();
        let now = datetime!(2026-06-01 10:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, None).await;

        let estimate = h
            .service
            .documents
            .create_estimate(tenant.id, items(), now)
            .await
            .unwrap();
        h.service.documents.send_estimate(estimate.id).await.unwrap();
        h.service.documents.decline_estimate(estimate.id).await.unwrap();

        let err = h
            .service
            .documents
            .convert_to_invoice(estimate.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
        assert_eq!(h.ledger.invoice_count(), 0);
    }

    #[tokio::test]
    async fn invoice_must_be_sent_before_payment() {
        let h = harness();
        let now = datetime!(2026-06-01 10:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, None).await;

        let invoice = h
            .service
            .documents
            .create_invoice(tenant.id, items(), None, now)
            .await
            .unwrap();

        // Draft invoices cannot be marked paid.
        let err = h
            .service
            .documents
            .mark_invoice_paid(invoice.id, "check", now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));

        h.service.documents.send_invoice(invoice.id).await.unwrap();
        let paid = h
            .service
            .documents
            .mark_invoice_paid(invoice.id, "check", now)
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.payment_source.as_deref(), Some("check"));
        assert_eq!(paid.paid_at, Some(now));

        // Paying again conflicts instead of double-recording.
        let err = h
            .service
            .documents
            .mark_invoice_paid(invoice.id, "check", now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
    }

    #[tokio::test]
    async fn overdue_is_derived_not_stored() {
        let h = harness();
        let now = datetime!(2026-06-01 10:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, None).await;

        let invoice = h
            .service
            .documents
            .create_invoice(tenant.id, items(), Some(now + Duration::days(5)), now)
            .await
            .unwrap();
        let sent = h.service.documents.send_invoice(invoice.id).await.unwrap();

        assert_eq!(sent.effective_status(now), InvoiceStatus::Sent);
        assert_eq!(
            sent.effective_status(now + Duration::days(6)),
            InvoiceStatus::Overdue
        );
        // The stored row never changes to overdue.
        let stored = h.ledger.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Sent);
    }

    #[tokio::test]
    async fn declined_invoice_charge_is_recorded_and_leaves_the_invoice_sent() {
        let h = harness();
        let now = datetime!(2026-06-01 10:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;

        let invoice = h
            .service
            .documents
            .create_invoice(tenant.id, items(), None, now)
            .await
            .unwrap();
        let sent = h.service.documents.send_invoice(invoice.id).await.unwrap();

        h.card.fail_token("card_a", ProcessorFailure::Declined {
            code: "do_not_honor".into(),
            message: "card declined".into(),
        });
        let err = h
            .service
            .reconcile
            .capture_invoice(&sent, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Processor(_)));

        // The failed attempt is on the books; the invoice stays sent.
        assert_eq!(h.ledger.payment_count(), 1);
        let payments = h.ledger.list_payments_for_tenant(tenant.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert!(payments[0].error.as_deref().unwrap().contains("declined"));
        let stored = h.ledger.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Sent);

        // Card recovers; the same invoice can still be charged.
        h.card.clear_failures();
        let record = h
            .service
            .reconcile
            .capture_invoice(&sent, now)
            .await
            .unwrap();
        assert_eq!(record.status, PaymentStatus::Succeeded);
        let stored = h.ledger.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(stored.payment_source.as_deref(), Some("card_on_file"));
    }
}

mod cancellation_settlement {
    use super::*;

    #[tokio::test]
    async fn missing_capability_is_rejected() {
        let h = harness();
        let now = datetime!(2026-07-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;

        let err = h
            .service
            .settlement
            .delete_tenant(tenant.id, None, false, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Authorization(_)));

        let stored = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert!(stored.deleted_at.is_none());
    }

    #[tokio::test]
    async fn fee_collected_on_the_way_out() {
        let h = harness();
        let now = datetime!(2026-07-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_a")).await;
        let sub = seed_subscription(
            h.ledger.as_ref(),
            &tenant,
            &plan,
            now + Duration::days(12),
            "card_a",
        )
        .await;

        let report = h
            .service
            .settlement
            .delete_tenant(tenant.id, Some("churn"), true, now)
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.fee_charged);
        assert_eq!(report.fee_amount_cents, 4900);
        assert_eq!(report.charge_error, None);

        let stored = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(now));
        assert!(!stored.is_active);
        let stored_sub = h.ledger.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored_sub.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn deletion_survives_a_missing_payment_method() {
        let h = harness();
        let now = datetime!(2026-07-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, None).await;

        let report = h
            .service
            .settlement
            .delete_tenant(tenant.id, None, true, now)
            .await
            .unwrap();
        assert!(report.success);
        assert!(!report.fee_charged);
        assert!(report
            .charge_error
            .as_deref()
            .unwrap()
            .contains("No payment method on file"));

        let stored = h.ledger.get_tenant(tenant.id).await.unwrap().unwrap();
        assert!(stored.deleted_at.is_some());
    }

    #[tokio::test]
    async fn deletion_survives_a_declined_fee() {
        let h = harness();
        let now = datetime!(2026-07-01 00:00 UTC);
        let plan = seed_plan(h.ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(h.ledger.as_ref(), &plan, Some("card_bad")).await;
        h.card.fail_token("card_bad", ProcessorFailure::Declined {
            code: "do_not_honor".into(),
            message: "card declined".into(),
        });

        let report = h
            .service
            .settlement
            .delete_tenant(tenant.id, None, true, now)
            .await
            .unwrap();
        assert!(report.success);
        assert!(!report.fee_charged);
        assert!(report.charge_error.as_deref().unwrap().contains("declined"));

        // The failed fee attempt is still on the books.
        let payments = h.ledger.list_payments_for_tenant(tenant.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);

        let err = h
            .service
            .settlement
            .delete_tenant(tenant.id, None, true, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
    }
}

mod notification_isolation {
    use super::*;

    #[tokio::test]
    async fn failed_receipt_delivery_never_blocks_the_charge() {
        let ledger = Arc::new(MemoryLedger::new());
        let card = Arc::new(FakeProcessor::new(ProcessorKind::CardOnFile));
        let order = Arc::new(FakeProcessor::new(ProcessorKind::RedirectOrder));
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let processors = ProcessorSet {
            card_on_file: card.clone(),
            redirect_order: order,
        };
        let service = BillingService::with_parts(ledger.clone(), processors, notifier);

        let now = datetime!(2026-08-01 06:00 UTC);
        let plan = seed_plan(ledger.as_ref(), 4900).await;
        let tenant = seed_tenant(ledger.as_ref(), &plan, Some("card_a")).await;
        let sub =
            seed_subscription(ledger.as_ref(), &tenant, &plan, now - Duration::days(1), "card_a")
                .await;

        let record = service.reconcile.capture_subscription(&sub, now).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Succeeded);
        assert_eq!(ledger.payment_count(), 1);
    }
}
