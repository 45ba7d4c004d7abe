// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // ledger transitions carry the full precondition
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Fieldpay Billing Module
//!
//! Recurring billing and payment reconciliation for the field-service
//! platform.
//!
//! ## Features
//!
//! - **Billing Cycle**: Select lapsed subscriptions and charge them in
//!   isolated batches with calendar-aware period advancement
//! - **Reconciliation**: Idempotent capture with deterministic keys and a
//!   single payment record per money movement
//! - **Documents**: Invoice and estimate state machines with one-shot
//!   estimate-to-invoice conversion
//! - **Webhooks**: Signed processor notifications, claimed by event id
//! - **Settlement**: Tenant cancellation with a best-effort final fee
//! - **Processors**: Card-on-file and redirect-order adapters behind one
//!   trait, selected per subscription

pub mod config;
pub mod cycle;
pub mod documents;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod processors;
pub mod reconcile;
pub mod settlement;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Config
pub use config::ProcessorConfig;

// Cycle
pub use cycle::{advance_period, BillingCycleEngine, BillingRunReport, ChargeOutcome};

// Documents
pub use documents::DocumentService;

// Error
pub use error::{BillingError, BillingResult, ProcessorFailure};

// Events
pub use events::{BillingEvent, BillingEventLogger, BillingEventType};

// Ledger
pub use ledger::{Ledger, MemoryLedger, PgLedger};

// Models
pub use models::{
    BillingInterval, Estimate, EstimateStatus, Invoice, InvoiceStatus, LineItem, PaymentMethod,
    PaymentRecord, PaymentStatus, Plan, ProcessorKind, Subscription, SubscriptionStatus, Tenant,
    TenantStatus,
};

// Notify
pub use notify::{LogNotifier, NotificationPort};

// Processors
pub use processors::{
    CardOnFileProcessor, PaymentResult, ProcessorAdapter, ProcessorSet, RedirectOrderProcessor,
};

// Reconcile
pub use reconcile::{OrderCaptureOutcome, ReconciliationService};

// Settlement
pub use settlement::{SettlementReport, SettlementService};

// Webhooks
pub use webhooks::{WebhookDisposition, WebhookGateway, WebhookReceipt};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub cycle: Arc<BillingCycleEngine>,
    pub reconcile: Arc<ReconciliationService>,
    pub documents: Arc<DocumentService>,
    pub webhooks: Arc<WebhookGateway>,
    pub settlement: Arc<SettlementService>,
    pub ledger: Arc<dyn Ledger>,
    pub processors: ProcessorSet,
}

impl BillingService {
    /// Wire the full engine against Postgres, reading processor credentials
    /// from the environment.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = ProcessorConfig::from_env()?;
        Self::new(&config, pool)
    }

    /// Wire the full engine with explicit processor config.
    pub fn new(config: &ProcessorConfig, pool: PgPool) -> BillingResult<Self> {
        let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool));
        let processors = ProcessorSet {
            card_on_file: Arc::new(CardOnFileProcessor::new(config)?),
            redirect_order: Arc::new(RedirectOrderProcessor::new(config)?),
        };
        Ok(Self::with_parts(ledger, processors, Arc::new(LogNotifier)))
    }

    /// Wire the engine from pre-built parts. Tests use this with the
    /// in-memory ledger and fake processor.
    pub fn with_parts(
        ledger: Arc<dyn Ledger>,
        processors: ProcessorSet,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        let reconcile = Arc::new(ReconciliationService::new(
            ledger.clone(),
            processors.clone(),
            notifier.clone(),
        ));
        let cycle = Arc::new(BillingCycleEngine::new(ledger.clone(), reconcile.clone()));
        let documents = Arc::new(DocumentService::new(ledger.clone(), notifier));
        let webhooks = Arc::new(WebhookGateway::new(
            ledger.clone(),
            processors.clone(),
            reconcile.clone(),
        ));
        let settlement = Arc::new(SettlementService::new(ledger.clone(), reconcile.clone()));
        Self {
            cycle,
            reconcile,
            documents,
            webhooks,
            settlement,
            ledger,
            processors,
        }
    }
}
