//! Configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use deployer_common::PoolConfig;

#[derive(Clone)]
pub struct Config {
    /// Redis the shared state store lives in
    pub redis_url: String,

    /// Idle back-off between polls of an empty queue
    pub poll_interval: Duration,

    /// Scratch space for per-deploy checkouts
    pub tmp_dir: PathBuf,

    /// sfdx auth URL for the dev hub session
    pub sfdx_auth_url: String,

    /// Pools to keep topped up; empty disables replenishment
    pub pool_configs: Vec<PoolConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let poll_interval = env::var("POLL_INTERVAL_MS")
            .ok()
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .context("POLL_INTERVAL_MS must be an integer")?
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(1));

        let tmp_dir = PathBuf::from(env::var("TMP_DIR").unwrap_or_else(|_| "tmp".to_string()));

        let sfdx_auth_url = env::var("SFDX_AUTH_URL")
            .context("SFDX_AUTH_URL must be set to the dev hub auth url")?;

        let pool_configs = match env::var("POOL_CONFIG") {
            Ok(raw) => serde_json::from_str(&raw)
                .context("POOL_CONFIG must be a JSON array of pool configs")?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            redis_url,
            poll_interval,
            tmp_dir,
            sfdx_auth_url,
            pool_configs,
        })
    }
}
