//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// History paging
    pub history: HistoryConfig,

    /// Reward amounts seeded into the settings table
    pub rewards: RewardsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "credit-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            history: HistoryConfig::default(),
            rewards: RewardsConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// How long a transaction waits for a row lock (milliseconds)
    pub lock_timeout_ms: i64,

    /// fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
            lock_timeout_ms: 5_000,
            sync_writes: true,
        }
    }
}

/// History paging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Page size when the caller passes 0
    pub default_page_size: u32,

    /// Upper bound on page size
    pub max_page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Default reward tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Credits for a new registration
    pub register_bonus: i64,
    /// Credits for an approved upload
    pub upload_bonus: i64,
    /// Upload bonus multiplier for dockerized projects
    pub docker_multiplier: i64,
    /// Daily check-in credits
    pub daily_bonus: i64,
    /// Credits paid to a referrer
    pub referral_bonus: i64,
    /// Credits for a published review
    pub review_bonus: i64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            register_bonus: 100,
            upload_bonus: 50,
            docker_multiplier: 2,
            daily_bonus: 5,
            referral_bonus: 20,
            review_bonus: 10,
        }
    }
}

impl RewardsConfig {
    /// Settings-table rows `(key, value, description)`
    pub fn entries(&self) -> Vec<(&'static str, i64, &'static str)> {
        vec![
            ("register_bonus", self.register_bonus, "Credits granted on registration"),
            ("upload_bonus", self.upload_bonus, "Credits granted for an approved upload"),
            ("docker_multiplier", self.docker_multiplier, "Upload bonus multiplier for dockerized projects"),
            ("daily_bonus", self.daily_bonus, "Credits granted per daily check-in"),
            ("referral_bonus", self.referral_bonus, "Credits granted to a referrer"),
            ("review_bonus", self.review_bonus, "Credits granted for a review"),
        ]
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.rocksdb.lock_timeout_ms = timeout.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_LOCK_TIMEOUT_MS is not a number: {}", timeout))
            })?;
        }

        if let Ok(size) = std::env::var("LEDGER_MAX_PAGE_SIZE") {
            config.history.max_page_size = size.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_MAX_PAGE_SIZE is not a number: {}", size))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.rocksdb.lock_timeout_ms <= 0 {
            return Err(crate::Error::Config(
                "rocksdb.lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.history.max_page_size == 0
            || self.history.default_page_size == 0
            || self.history.default_page_size > self.history.max_page_size
        {
            return Err(crate::Error::Config(format!(
                "invalid history paging: default {} / max {}",
                self.history.default_page_size, self.history.max_page_size
            )));
        }
        if self.rewards.entries().iter().any(|(_, value, _)| *value < 0) {
            return Err(crate::Error::Config(
                "reward amounts must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
