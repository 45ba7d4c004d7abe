//! Application state

use std::sync::Arc;

use fieldpay_billing::{BillingService, RedirectOrderProcessor};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub billing: Arc<BillingService>,
    /// Concrete redirect-order client for the order-creation flow; capture
    /// goes through the adapter trait on `billing`.
    pub order_processor: Arc<RedirectOrderProcessor>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let billing = Arc::new(BillingService::new(&config.processor, pool.clone())?);
        let order_processor = Arc::new(RedirectOrderProcessor::new(&config.processor)?);
        Ok(Self {
            pool,
            config: Arc::new(config),
            billing,
            order_processor,
        })
    }
}
