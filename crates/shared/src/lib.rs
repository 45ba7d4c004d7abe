//! Fieldpay Shared
//!
//! Common primitives used by the billing engine, the API server and the
//! worker: database pool helpers and the billing interval reference type.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Billing interval of a plan. Plans are immutable reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
    OneTime,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
            BillingInterval::OneTime => "one_time",
        }
    }
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingInterval::Monthly),
            "yearly" => Ok(BillingInterval::Yearly),
            "one_time" => Ok(BillingInterval::OneTime),
            other => Err(format!("unknown billing interval: {other}")),
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format an integer minor-unit amount as dollars for log/display output.
pub fn format_cents(cents: i64) -> String {
    format!("${:.2}", cents as f64 / 100.0)
}

/// Create the application database pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}

/// Run the embedded sqlx migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
