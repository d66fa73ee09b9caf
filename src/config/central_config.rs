use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::core::bluetooth::{DEFAULT_PLACEHOLDER_NAME, LAST_KNOWN_PERIPHERAL_KEY};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "central_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid log level: {0:?}")]
    InvalidLogLevel(String),
    #[error("Placeholder name must not be empty")]
    EmptyPlaceholder,
    #[error("Store key must not be empty")]
    EmptyStoreKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// `log` level filter name (`error` … `trace`); `RUST_LOG` overrides it.
    pub log_level: String,

    /// Where the last selected peripheral is remembered.
    /// `None` keeps it in memory only.
    pub store_path: Option<PathBuf>,

    /// Store key of the last selected peripheral
    pub last_known_key: String,

    /// Display name for peripherals that advertise no name
    pub placeholder_name: String,

    /// Try to reconnect to the last selected peripheral once the adapter is ready
    pub reconnect_on_ready: bool,

    /// Start scanning once the adapter is ready if no reconnection was attempted
    pub scan_on_ready: bool,

    /// Disconnect the previous peripheral when the selection changes
    pub disconnect_superseded: bool,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            log_level: "info".to_string(),
            store_path: None,
            last_known_key: LAST_KNOWN_PERIPHERAL_KEY.to_string(),
            placeholder_name: DEFAULT_PLACEHOLDER_NAME.to_string(),
            reconnect_on_ready: true,
            scan_on_ready: false,
            disconnect_superseded: true,
        }
    }
}

impl CentralConfig {
    /// Loads the config from `path`, falling back to defaults when the file
    /// does not exist.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to `path`, creating parent directories as needed.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_directory_exists(parent).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize central config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Central config saved to {:?}.", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        if self.placeholder_name.trim().is_empty() {
            return Err(ConfigError::EmptyPlaceholder);
        }
        if self.last_known_key.is_empty() {
            return Err(ConfigError::EmptyStoreKey);
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CentralConfig::load_config(&dir.path().join(CONFIG_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(config, CentralConfig::default());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = CentralConfig {
            log_level: "debug".into(),
            scan_on_ready: true,
            store_path: Some(dir.path().join("store.json")),
            ..CentralConfig::default()
        };
        config.save_config(&path).await.unwrap();
        assert_eq!(CentralConfig::load_config(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "placeholder_name": "Sensor" }"#).unwrap();
        let config = CentralConfig::load_config(&path).await.unwrap();
        assert_eq!(config.placeholder_name, "Sensor");
        assert!(config.reconnect_on_ready);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "log_level": "loud" }"#).unwrap();
        assert!(CentralConfig::load_config(&path).await.is_err());

        let config = CentralConfig {
            placeholder_name: " ".into(),
            ..CentralConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPlaceholder)));
    }
}
