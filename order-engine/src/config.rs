//! Configuration for the order engine

use serde::{Deserialize, Serialize};

/// Order engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Order number prefix
    pub order_number_prefix: String,

    /// Attempts to find an unused order number before giving up
    pub order_number_max_attempts: u32,

    /// Purchase-history page size when the caller passes 0
    pub default_history_page_size: u32,

    /// Upper bound on purchase-history page size
    pub max_history_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_number_prefix: "EC".to_string(),
            order_number_max_attempts: 10,
            default_history_page_size: 20,
            max_history_page_size: 100,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(prefix) = std::env::var("ORDER_NUMBER_PREFIX") {
            config.order_number_prefix = prefix;
        }

        if let Ok(attempts) = std::env::var("ORDER_NUMBER_MAX_ATTEMPTS") {
            config.order_number_max_attempts = attempts.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "ORDER_NUMBER_MAX_ATTEMPTS is not a number: {}",
                    attempts
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.order_number_prefix.is_empty()
            || !self
                .order_number_prefix
                .chars()
                .all(|c| c.is_ascii_uppercase())
        {
            return Err(crate::Error::Config(format!(
                "order number prefix must be uppercase ASCII letters: {:?}",
                self.order_number_prefix
            )));
        }
        if self.order_number_max_attempts == 0 {
            return Err(crate::Error::Config(
                "order_number_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_history_page_size == 0
            || self.default_history_page_size > self.max_history_page_size
        {
            return Err(crate::Error::Config(format!(
                "history page sizes must satisfy 1 <= default ({}) <= max ({})",
                self.default_history_page_size, self.max_history_page_size
            )));
        }
        Ok(())
    }
}
