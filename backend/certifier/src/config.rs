//! Service configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database location (e.g. `sqlite:./certifier.db`)
    pub database_url: String,
    /// Maximum pooled SQLite connections
    pub db_max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// JSON-RPC endpoint of the recording ledger; `None` selects the local hash ledger
    pub ledger_rpc_url: Option<String>,
    /// Upper bound on a single ledger submission
    pub ledger_timeout: Duration,
    /// How often the retry worker scans for unrecorded approvals
    pub retry_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite:./certifier.db"),
            db_max_connections: parse("DB_MAX_CONNECTIONS", &var("DB_MAX_CONNECTIONS", "5"))?,
            api_port: parse("API_PORT", &var("API_PORT", "3002"))?,
            ledger_rpc_url: lookup("LEDGER_RPC_URL").filter(|url| !url.trim().is_empty()),
            ledger_timeout: Duration::from_secs(parse(
                "LEDGER_TIMEOUT_SECS",
                &var("LEDGER_TIMEOUT_SECS", "30"),
            )?),
            retry_interval: Duration::from_secs(parse(
                "RETRY_INTERVAL_SECS",
                &var("RETRY_INTERVAL_SECS", "10"),
            )?),
        })
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::Config(format!("Invalid {key}: {raw:?}")))
}
