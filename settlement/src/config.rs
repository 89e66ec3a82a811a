//! Configuration for the settlement engine

use account_ledger::{address, Drops, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 25 XRP in drops
pub const DEFAULT_SETTLE_THRESHOLD: u64 = 25_000_000;

/// Largest deferred amount held back for an unconfirmed destination
pub const DEFAULT_FUNDING_CUTOFF: u64 = 25_000_000;

/// Debounce delay before a deferred settlement fires
pub const DEFAULT_DEBOUNCE_MS: u64 = 60_000;

/// Longest accepted debounce delay (one day)
pub const MAX_DEBOUNCE_MS: u64 = 86_400_000;

/// Default wait for a validated-transaction notification
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 120_000;

/// Longest accepted confirmation wait (one hour)
pub const MAX_CONFIRMATION_TIMEOUT_MS: u64 = 3_600_000;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Account storage configuration
    pub storage: StorageConfig,

    /// Threshold / debounce configuration
    pub settlement: SettlementConfig,

    /// Ledger connection configuration
    pub ledger: LedgerConfig,

    /// Discovery configuration
    pub discovery: DiscoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            settlement: SettlementConfig::default(),
            ledger: LedgerConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Settlement policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Balance (drops) above which an account settles
    pub threshold_drops: u64,

    /// Merged amount (drops) above which settlement skips the debounce
    pub funding_cutoff_drops: u64,

    /// Debounce delay for deferred settlements (milliseconds)
    pub debounce_ms: u64,

    /// How long to wait for a validated-transaction notification (milliseconds)
    pub confirmation_timeout_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            threshold_drops: DEFAULT_SETTLE_THRESHOLD,
            funding_cutoff_drops: DEFAULT_FUNDING_CUTOFF,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
        }
    }
}

impl SettlementConfig {
    /// Threshold as drops
    pub fn threshold(&self) -> Drops {
        Drops::from(self.threshold_drops)
    }

    /// Funding cutoff as drops
    pub fn funding_cutoff(&self) -> Drops {
        Drops::from(self.funding_cutoff_drops)
    }

    /// Debounce delay
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Confirmation timeout
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

/// Ledger client mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// In-process simulated ledger
    Simulated,
}

/// Ledger connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger server URL
    pub server: String,

    /// Address settlements are paid from
    pub source_address: String,

    /// Signing secret for the source address
    pub secret: String,

    /// Client mode
    pub mode: LedgerMode,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            server: "wss://s.altnet.rippletest.net:51233".to_string(),
            source_address: String::new(),
            secret: String::new(),
            mode: LedgerMode::Simulated,
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Address prefix under which discovery identifiers are resolved
    pub ilp_prefix: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ilp_prefix: "g.settle.spsp".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables onto this configuration
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(dir) = std::env::var("SETTLE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(value) = std::env::var("SETTLE_THRESHOLD_DROPS") {
            self.settlement.threshold_drops = parse_env("SETTLE_THRESHOLD_DROPS", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLE_FUNDING_CUTOFF_DROPS") {
            self.settlement.funding_cutoff_drops =
                parse_env("SETTLE_FUNDING_CUTOFF_DROPS", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLE_DEBOUNCE_MS") {
            self.settlement.debounce_ms = parse_env("SETTLE_DEBOUNCE_MS", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLE_CONFIRMATION_TIMEOUT_MS") {
            self.settlement.confirmation_timeout_ms =
                parse_env("SETTLE_CONFIRMATION_TIMEOUT_MS", &value)?;
        }

        if let Ok(server) = std::env::var("SETTLE_LEDGER_SERVER") {
            self.ledger.server = server;
        }

        if let Ok(address) = std::env::var("SETTLE_SOURCE_ADDRESS") {
            self.ledger.source_address = address;
        }

        if let Ok(secret) = std::env::var("SETTLE_SECRET") {
            self.ledger.secret = secret;
        }

        Ok(())
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> crate::Result<()> {
        if self.settlement.threshold_drops == 0 {
            return Err(crate::Error::Config("threshold_drops must be positive".to_string()));
        }
        if self.settlement.funding_cutoff_drops == 0 {
            return Err(crate::Error::Config(
                "funding_cutoff_drops must be positive".to_string(),
            ));
        }
        if self.settlement.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(crate::Error::Config(format!(
                "debounce_ms {} exceeds the maximum of {}",
                self.settlement.debounce_ms, MAX_DEBOUNCE_MS
            )));
        }
        if self.settlement.confirmation_timeout_ms == 0
            || self.settlement.confirmation_timeout_ms > MAX_CONFIRMATION_TIMEOUT_MS
        {
            return Err(crate::Error::Config(format!(
                "confirmation_timeout_ms must be in 1..={}, got {}",
                MAX_CONFIRMATION_TIMEOUT_MS, self.settlement.confirmation_timeout_ms
            )));
        }
        if !address::is_valid(&self.ledger.source_address) {
            return Err(crate::Error::Config(format!(
                "source_address '{}' is not a valid ledger address",
                self.ledger.source_address
            )));
        }
        if self.ledger.secret.is_empty() {
            return Err(crate::Error::Config("ledger secret is required".to_string()));
        }
        Ok(())
    }
}

fn parse_env(name: &str, value: &str) -> crate::Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| crate::Error::Config(format!("{}='{}': {}", name, value, e)))
}
