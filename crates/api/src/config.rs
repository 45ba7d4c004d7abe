//! API server configuration

use fieldpay_billing::ProcessorConfig;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub processor: ProcessorConfig,
}

impl Config {
    /// Read configuration from the environment. Fails fast on anything
    /// required; processor credentials are collected here once and injected
    /// into the services, never read ad hoc later.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid port number"))?;
        let processor = ProcessorConfig::from_env()
            .map_err(|e| anyhow::anyhow!("processor configuration: {e}"))?;

        Ok(Self {
            database_url,
            port,
            processor,
        })
    }
}
