//! Fieldpay Background Worker
//!
//! Handles scheduled jobs:
//! - Daily billing cycle batch (3:00 UTC) with an overall deadline
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use fieldpay_billing::BillingService;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Hard ceiling for one batch run; subscriptions not reached before it
/// elapses wait for the next day's run.
const BATCH_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

async fn run_billing_batch(billing: Arc<BillingService>) {
    info!("Running scheduled billing cycle batch");
    // The deadline is enforced between subscriptions inside the batch, so
    // a long run stops cleanly instead of being cancelled mid-settlement.
    match billing
        .cycle
        .run_batch(OffsetDateTime::now_utc(), BATCH_DEADLINE)
        .await
    {
        Ok(report) => {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                "Billing cycle batch complete"
            );
            for outcome in report.outcomes.iter().filter(|o| !o.success) {
                error!(
                    subscription_id = %outcome.subscription_id,
                    tenant_id = %outcome.tenant_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Subscription charge failed"
                );
            }
        }
        Err(e) => error!(error = %e, "Billing cycle batch failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Fieldpay Worker");

    let pool = create_db_pool().await?;

    // Create billing service
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // If the processors aren't configured, run in minimal mode
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            info!("Worker running without processor integration");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Daily billing cycle batch
    // Cron: 3:00 UTC every day, after the processors' own nightly settlement
    let batch_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = batch_billing.clone();
            Box::pin(async move {
                run_billing_batch(billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Billing cycle batch (daily 3:00 UTC)");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    // Keep the worker alive
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
