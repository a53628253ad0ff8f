use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB: &str = "trade_ledger.db";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000/api";
const DEFAULT_MAX_UPLOAD_MB: usize = 10;
const DEFAULT_IMPORT_TTL_SECS: u64 = 3600;

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Base URL advertised by `/api/docs`.
    pub public_url: String,
    pub max_upload_bytes: usize,
    pub import_session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: PathBuf::from(DEFAULT_DB),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            import_session_ttl: Duration::from_secs(DEFAULT_IMPORT_TTL_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let bind_addr = match lookup("TRADE_LEDGER_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("TRADE_LEDGER_ADDR is not a socket address: {}", raw))?,
            None => defaults.bind_addr,
        };

        let database_path = lookup("TRADE_LEDGER_DB")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let public_url = lookup("TRADE_LEDGER_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.public_url);

        let max_upload_bytes = match lookup("TRADE_LEDGER_MAX_UPLOAD_MB") {
            Some(raw) => {
                let mb = raw
                    .parse::<usize>()
                    .with_context(|| format!("TRADE_LEDGER_MAX_UPLOAD_MB is not a number: {}", raw))?;
                anyhow::ensure!(mb > 0, "TRADE_LEDGER_MAX_UPLOAD_MB must be positive");
                mb.checked_mul(1024 * 1024)
                    .with_context(|| format!("TRADE_LEDGER_MAX_UPLOAD_MB is too large: {}", mb))?
            }
            None => defaults.max_upload_bytes,
        };

        let import_session_ttl = match lookup("TRADE_LEDGER_IMPORT_TTL_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .with_context(|| format!("TRADE_LEDGER_IMPORT_TTL_SECS is not a number: {}", raw))?,
            ),
            None => defaults.import_session_ttl,
        };

        Ok(Config {
            bind_addr,
            database_path,
            public_url,
            max_upload_bytes,
            import_session_ttl,
        })
    }
}
