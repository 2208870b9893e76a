//! Configuration for the ledger

use crate::validation::RulePolicy;
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

    /// Leading zero hex characters required of a sealed block digest
    pub difficulty: usize,

    /// Persist blocks and transactions to RocksDB
    pub persistence: bool,

    /// Business-rule thresholds
    pub rules: RulePolicy,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Actor configuration
    pub actor: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "provenance-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            difficulty: 2,
            persistence: true,
            rules: RulePolicy::default(),
            rocksdb: RocksDBConfig::default(),
            actor: ActorConfig::default(),
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
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Single-writer actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox capacity
    pub mailbox_capacity: usize,

    /// Give up sealing after this long (no deadline when unset)
    pub seal_timeout_ms: Option<u64>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            seal_timeout_ms: None,
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

    /// Load defaults overridden by environment variables
    pub fn from_env() -> crate::Result<Self> {
        Config::default().with_env_overrides()
    }

    /// Apply `PROVENANCE_*` environment overrides
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        if let Ok(data_dir) = std::env::var("PROVENANCE_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(difficulty) = std::env::var("PROVENANCE_DIFFICULTY") {
            self.difficulty = difficulty.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid PROVENANCE_DIFFICULTY: {}", e))
            })?;
        }

        if let Ok(flag) = std::env::var("PROVENANCE_PERSISTENCE") {
            self.persistence = parse_flag("PROVENANCE_PERSISTENCE", &flag)?;
        }

        if let Ok(flag) = std::env::var("PROVENANCE_MONSOON_RESTRICTION") {
            self.rules.monsoon_restriction.enabled =
                parse_flag("PROVENANCE_MONSOON_RESTRICTION", &flag)?;
        }

        if let Ok(ms) = std::env::var("PROVENANCE_SEAL_TIMEOUT_MS") {
            self.actor.seal_timeout_ms = Some(ms.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid PROVENANCE_SEAL_TIMEOUT_MS: {}", e))
            })?);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        // a SHA-256 hex digest has 64 characters
        if self.difficulty > 64 {
            return Err(crate::Error::Config(format!(
                "difficulty {} exceeds digest length",
                self.difficulty
            )));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config("mailbox_capacity must be > 0".into()));
        }
        let months = 1..=12;
        let season = &self.rules.monsoon_restriction;
        if !months.contains(&season.start_month) || !months.contains(&season.end_month) {
            return Err(crate::Error::Config("monsoon months must be 1-12".into()));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> crate::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(crate::Error::Config(format!("Invalid {}: {}", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "provenance-ledger");
        assert_eq!(config.difficulty, 2);
        assert!(!config.rules.monsoon_restriction.enabled);
        assert!(config.actor.seal_timeout_ms.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            difficulty = 3

            [rules]
            pesticide_max = "0.02"

            [rules.monsoon_restriction]
            enabled = true
            start_month = 6
            end_month = 9
            "#,
        )
        .unwrap();

        assert_eq!(config.difficulty, 3);
        assert!(config.persistence);
        assert_eq!(config.rules.pesticide_max, Decimal::new(2, 2));
        assert_eq!(config.rules.moisture_max, Decimal::from(12));
        assert!(config.rules.monsoon_restriction.enabled);
        assert_eq!(config.rules.harvest_zone.max_latitude, 37.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.difficulty = 65;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rules.monsoon_restriction.end_month = 13;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrapping_monsoon_window_is_enforced() {
        use chrono::{TimeZone, Utc};

        let config: Config = toml::from_str(
            r#"
            [rules.monsoon_restriction]
            enabled = true
            start_month = 11
            end_month = 2
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        let season = &config.rules.monsoon_restriction;
        assert!(season.forbids(Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()));
        assert!(!season.forbids(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }
}
