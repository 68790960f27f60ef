//! Runtime configuration (`config.json` in the data directory).
//!
//! Every field has a default, so a partial file is valid. A missing file is
//! written out with defaults on first start.

use crate::contribution::{Amount, LedgerSettings};
use crate::error::{MinerHatError, Result};
use crate::miner::BackoffConfig;
use crate::pool::PoolKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Highest config schema version this build understands.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerHatConfig {
    pub schema_version: u32,
    pub mining: MiningConfig,
    pub contribution: ContributionConfig,
    pub economy: EconomyConfig,
    pub mining_note: MiningNote,
}

impl Default for MinerHatConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            mining: MiningConfig::default(),
            contribution: ContributionConfig::default(),
            economy: EconomyConfig::default(),
            mining_note: MiningNote::default(),
        }
    }
}

/// Miner scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Policy name, resolved to `miner/<name>.json`.
    pub miner: String,
    /// Health check period; zero or less disables the check timer.
    pub check_interval_seconds: i64,
    /// Periodic restart period; zero or less disables restarts.
    pub restart_interval_minutes: i64,
    pub stop_grace_seconds: u64,
    pub restart_backoff: BackoffConfig,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            miner: "xmrig".to_string(),
            check_interval_seconds: 60,
            restart_interval_minutes: 360,
            stop_grace_seconds: 10,
            restart_backoff: BackoffConfig::default(),
        }
    }
}

impl MiningConfig {
    pub fn check_interval(&self) -> Option<Duration> {
        positive_secs(self.check_interval_seconds)
    }

    pub fn restart_interval(&self) -> Option<Duration> {
        positive_secs(self.restart_interval_minutes.saturating_mul(60))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

/// Pool tracking and revenue attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContributionConfig {
    pub enabled: bool,
    pub pool: PoolKind,
    /// Overrides the pool's default API base URL.
    pub pool_api_url: Option<String>,
    pub wallet_address: String,
    pub cryptocurrency: String,
    /// Decimal places of the pool's atomic unit (12 for Monero).
    pub coin_decimals: u32,
    pub worker_prefix: String,
    /// Pool snapshot cache TTL.
    pub wallet_info_expire_seconds: u64,
    /// Pool sync period; zero disables the sync timer.
    pub pool_sync_interval_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Share of pool revenue credited to players.
    pub revenue_factor: Amount,
}

impl Default for ContributionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool: PoolKind::default(),
            pool_api_url: None,
            wallet_address: String::new(),
            cryptocurrency: "XMR".to_string(),
            coin_decimals: 12,
            worker_prefix: "minerhat_".to_string(),
            wallet_info_expire_seconds: 300,
            pool_sync_interval_seconds: 600,
            request_timeout_seconds: 15,
            revenue_factor: Amount::from_whole(1),
        }
    }
}

impl ContributionConfig {
    /// API base URL for the configured pool.
    pub fn api_url(&self) -> Option<&str> {
        self.pool_api_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.pool.default_api_url())
    }

    /// Worker name the server's own miner reports under.
    pub fn server_worker(&self) -> String {
        format!("{}server", self.worker_prefix)
    }

    pub fn wallet_info_ttl(&self) -> Duration {
        Duration::from_secs(self.wallet_info_expire_seconds)
    }

    pub fn pool_sync_interval(&self) -> Option<Duration> {
        (self.pool_sync_interval_seconds > 0)
            .then(|| Duration::from_secs(self.pool_sync_interval_seconds))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

/// Exchange into the external economy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub enabled: bool,
    /// External currency per unit of cryptocurrency.
    pub exchange_rate: f64,
    pub minimum_exchange_amount: Amount,
    /// Currency label written to the economy journal.
    pub currency_name: String,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exchange_rate: 1000.0,
            minimum_exchange_amount: Amount::from_units(100_000_000),
            currency_name: "coins".to_string(),
        }
    }
}

/// Message shown to players asking how to mine for the server.
///
/// `{address}` and `{worker}` are substituted per player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningNote {
    pub message: String,
    pub value: String,
}

impl Default for MiningNote {
    fn default() -> Self {
        Self {
            message: "Point your miner at the pool with wallet {address} and worker {worker}."
                .to_string(),
            value: String::new(),
        }
    }
}

impl MiningNote {
    pub fn render(&self, address: &str, worker: &str) -> String {
        let render = |s: &str| s.replace("{address}", address).replace("{worker}", worker);
        if self.value.trim().is_empty() {
            render(&self.message)
        } else {
            format!("{} {}", render(&self.message), render(&self.value))
        }
    }
}

impl MinerHatConfig {
    /// Read and validate `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MinerHatError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            MinerHatError::Config(format!("malformed {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(?path, "Wrote default configuration");
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MinerHatError::Config(msg));

        if self.schema_version == 0 || self.schema_version > CONFIG_SCHEMA_VERSION {
            return fail(format!(
                "config schema version {} is not supported (max {})",
                self.schema_version, CONFIG_SCHEMA_VERSION
            ));
        }

        if self.mining.enabled {
            let miner = self.mining.miner.trim();
            if miner.is_empty() || miner.contains(['/', '\\']) || miner.starts_with('.') {
                return fail(format!("mining.miner '{}' is not a valid policy name", miner));
            }
        }
        self.mining
            .restart_backoff
            .validate()
            .map_err(MinerHatError::Config)?;

        let c = &self.contribution;
        if c.revenue_factor.is_negative() {
            return fail(format!(
                "contribution.revenue_factor must not be negative, got {}",
                c.revenue_factor
            ));
        }
        if c.coin_decimals > 18 {
            return fail(format!(
                "contribution.coin_decimals must be at most 18, got {}",
                c.coin_decimals
            ));
        }
        if c.enabled {
            if c.wallet_address.trim().is_empty() {
                return fail(
                    "contribution.wallet_address is required when contribution is enabled"
                        .to_string(),
                );
            }
            if c.api_url().is_none() {
                return fail(format!(
                    "contribution.pool_api_url is required for pool '{}'",
                    c.pool
                ));
            }
        }

        let e = &self.economy;
        if !e.exchange_rate.is_finite() || e.exchange_rate <= 0.0 {
            return fail(format!(
                "economy.exchange_rate must be positive, got {}",
                e.exchange_rate
            ));
        }
        if e.minimum_exchange_amount.is_negative() {
            return fail(format!(
                "economy.minimum_exchange_amount must not be negative, got {}",
                e.minimum_exchange_amount
            ));
        }

        Ok(())
    }

    /// Ledger settings derived from this config.
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            revenue_factor: self.contribution.revenue_factor,
            worker_prefix: self.contribution.worker_prefix.clone(),
            minimum_exchange: self.economy.minimum_exchange_amount,
            ..LedgerSettings::default()
        }
    }
}

fn positive_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}
