//! Persistent CLI configuration.
//!
//! A single JSON file under the platform config directory holds the sync
//! server URL, the bearer token, and this installation's stable device id.
//! Environment variables override file values; the device id is generated
//! once and written back so every push batch carries the same identity.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chartbook")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chartbook")
        .join("chartbook.db")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CHARTBOOK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl CliConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read {}: {error}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse {}: {error}", path.display()))
        })
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Server URL with the environment taking precedence over the file.
    #[must_use]
    pub fn resolved_server_url(&self) -> Option<String> {
        normalize(env::var("CHARTBOOK_SERVER_URL").ok()).or_else(|| normalize(self.server_url.clone()))
    }

    /// Bearer token with the environment taking precedence over the file.
    #[must_use]
    pub fn resolved_token(&self) -> Option<String> {
        normalize(env::var("CHARTBOOK_TOKEN").ok()).or_else(|| normalize(self.token.clone()))
    }

    /// Device id, generating and persisting one on first use.
    pub fn resolved_device_id(&mut self) -> Result<String, CliError> {
        if let Some(device_id) = normalize(env::var("CHARTBOOK_DEVICE_ID").ok()) {
            return Ok(device_id);
        }
        if let Some(device_id) = normalize(self.device_id.clone()) {
            return Ok(device_id);
        }

        let device_id = Uuid::now_v7().to_string();
        self.device_id = Some(device_id.clone());
        self.save()?;
        Ok(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = CliConfig {
            server_url: Some("https://chartbook.example.com".to_string()),
            token: Some("secret".to_string()),
            device_id: Some("device-1".to_string()),
        };
        config.save_to_path(&path).unwrap();

        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            CliConfig::load_from_path(&path),
            Err(CliError::Config(_))
        ));
    }
}
