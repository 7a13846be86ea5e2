//! Runtime configuration
//!
//! Hosts hand the configuration over as JSON ([`GateConfig::from_json`]).
//! Desktop binaries can layer an optional file and `BLE_COMMON__*`
//! environment variables on top of the defaults ([`GateConfig::load`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::ble::ScanConfig;
use crate::logging::LogSettings;
use crate::permission::SPLIT_BLUETOOTH_PERMISSIONS_API;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Platform API level; selects the required permission set
    pub api_level: u32,
    /// Directory of the permanent-denial record; `None` keeps it in memory
    pub storage_dir: Option<PathBuf>,
    pub scan: ScanConfig,
    pub logging: LogSettings,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            api_level: SPLIT_BLUETOOTH_PERMISSIONS_API,
            storage_dir: None,
            scan: ScanConfig::default(),
            logging: LogSettings::default(),
        }
    }
}

impl GateConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` if it exists, then `BLE_COMMON__*` variables
    /// (e.g. `BLE_COMMON__SCAN__KEEP_ALIVE_MS=2000`)
    #[cfg(feature = "config-file")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BLE_COMMON")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_level == 0 {
            return Err(ConfigError::Invalid("api_level must be positive".to_string()));
        }
        if self.scan.channel_capacity == 0 {
            return Err(ConfigError::Invalid("scan.channel_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to load config: {0}")]
    Load(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_fills_defaults() {
        let config = GateConfig::from_json(br#"{"api_level": 30, "scan": {"keep_alive_ms": 100}}"#).unwrap();
        assert_eq!(config.api_level, 30);
        assert_eq!(config.scan.keep_alive_ms, 100);
        assert_eq!(config.scan.channel_capacity, 64);
        assert!(config.logging.enabled);
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            GateConfig::from_json(br#"{"scan": {"channel_capacity": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(GateConfig::from_json(b"not json"), Err(ConfigError::Parse(_))));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ble-common.json");
        std::fs::write(&path, r#"{"api_level": 29, "logging": {"level": "debug"}}"#).unwrap();

        let config = GateConfig::load(Some(&path)).unwrap();
        assert_eq!(config.api_level, 29);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = GateConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.api_level, GateConfig::default().api_level);
    }
}
