//! Configuration management for shuppan.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Shuppan";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Placeholder value for an unconfigured bearer token.
const TOKEN_PLACEHOLDER: &str = "YOUR_SESSION_TOKEN_HERE";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote catalog API configuration.
    pub api: ApiConfig,

    /// Reference dataset (chapter dump) settings.
    pub dump: DumpConfig,

    /// Request quota settings.
    pub rate_limits: RateLimitsConfig,

    /// Upload retry behavior.
    pub upload: UploadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            dump: DumpConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

/// Remote catalog API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the catalog API.
    pub base_url: String,

    /// Bearer token for the upload credential (required).
    pub token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.comichoard.org".to_string(),
            token: TOKEN_PLACEHOLDER.to_string(),
        }
    }
}

impl ApiConfig {
    /// Checks if the bearer token is configured (not placeholder).
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && self.token != TOKEN_PLACEHOLDER
    }
}

/// Reference dataset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Base URL of the chapter dump CSV export. The series identifier is
    /// appended as the final path segment.
    pub base_url: String,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dump.comichoard.org/export".to_string(),
        }
    }
}

/// Request quota settings.
///
/// Buckets compose narrowest scope first: the upload-endpoint bucket is
/// waited on before the global one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Requests allowed per window on the upload endpoints.
    pub upload_capacity: u32,

    /// Upload-endpoint window length in seconds.
    pub upload_interval_sec: u64,

    /// Requests allowed per window across the whole API.
    pub global_capacity: u32,

    /// Global window length in seconds.
    pub global_interval_sec: u64,

    /// Maximum consecutive 429 responses tolerated before a request is
    /// abandoned. A 429 means the bucket configuration is already more
    /// generous than the remote quota, so this ceiling is what keeps the
    /// retry loop from spinning forever.
    pub quota_retry_limit: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            upload_capacity: 20,
            upload_interval_sec: 60,
            global_capacity: 5,
            global_interval_sec: 1,
            quota_retry_limit: 10,
        }
    }
}

/// Upload retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Consecutive network failures tolerated per chapter before the run
    /// pauses.
    pub network_retry_limit: u32,

    /// Delays in seconds applied before each network retry. When the
    /// retry limit exceeds the table length, the last entry repeats.
    pub network_retry_delays_sec: Vec<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            network_retry_limit: 3,
            network_retry_delays_sec: vec![2, 5, 10],
        }
    }
}

impl UploadConfig {
    /// Returns the retry delay table as durations.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.network_retry_delays_sec
            .iter()
            .map(|&s| Duration::from_secs(s))
            .collect()
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            // Create default config
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.is_configured() {
            return Err(ConfigError::MissingValue(
                "api.token (set your session token in config file)".to_string(),
            ));
        }

        if self.rate_limits.upload_capacity == 0 || self.rate_limits.global_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limits".to_string(),
                message: "bucket capacities must be greater than 0".to_string(),
            });
        }

        if self.rate_limits.quota_retry_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limits.quota_retry_limit".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.upload.network_retry_delays_sec.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "upload.network_retry_delays_sec".to_string(),
                message: "at least one retry delay is required".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.api.is_configured());
        assert_eq!(config.rate_limits.upload_capacity, 20);
        assert_eq!(config.rate_limits.quota_retry_limit, 10);
        assert_eq!(config.upload.network_retry_limit, 3);
        assert_eq!(config.upload.network_retry_delays_sec, vec![2, 5, 10]);
    }

    #[test]
    fn test_token_configured_check() {
        let mut api = ApiConfig::default();
        assert!(!api.is_configured());

        api.token = "session-abc123".to_string();
        assert!(api.is_configured());
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();

        config.save_to(file.path()).unwrap();

        let loaded = Config::load_from(file.path()).unwrap();
        assert_eq!(loaded.api.base_url, config.api.base_url);
        assert_eq!(
            loaded.rate_limits.upload_interval_sec,
            config.rate_limits.upload_interval_sec
        );
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_err()); // token not set

        let mut config = Config::default();
        config.api.token = "session-abc123".to_string();
        assert!(config.validate().is_ok());

        config.rate_limits.global_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_table() {
        let config = UploadConfig::default();
        assert_eq!(
            config.retry_delays(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
    }
}
