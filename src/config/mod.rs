//! Configuration management for plugkeeper
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use plugkeeper::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Remote service: {}:{}", config.remote.host, config.remote.port);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `PLUGKEEPER__<section>__<key>`
//!
//! Examples:
//! - `PLUGKEEPER__REMOTE__HOST=updates.example.com`
//! - `PLUGKEEPER__UPDATER__INTERVAL=30m`
//! - `PLUGKEEPER__BACKUP__ENABLED=true`
//!
//! Secrets are read only from `PLUGKEEPER_SERVER_KEY` and `PLUGKEEPER_UPLOAD_PASSWORD`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/plugkeeper.toml`.
//! This can be overridden using the `PLUGKEEPER_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{
    APP_DIR, BackupConfig, CatalogConfig, Config, LoggingConfig, PathsConfig, ReleaseConfig, RemoteConfig,
    STAGING_DIR, ServerConfig, UpdaterConfig, UploadConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`PLUGKEEPER__*`, plus the secret variables)
    /// 2. TOML file (default: `config/plugkeeper.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(sources::default_path())
    }

    /// Load configuration from a specific path, still honouring the environment
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load without reading secrets or validating. Useful for tests.
    pub fn load_unchecked(path: PathBuf) -> Result<Self, ConfigError> {
        Ok(sources::load_from_sources(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_offline_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[remote]
online_console = false

[updater.plugins]
enabled = false
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_unchecked(config_path).unwrap();
        assert!(!config.uses_remote());
        assert!(validation::validate(&config).is_ok());
    }

    #[test]
    fn test_validation_catches_release_without_feed() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[remote]
online_console = false

[updater.plugins]
enabled = false

[updater.server]
enabled = true
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_unchecked(config_path).unwrap();
        assert!(matches!(
            validation::validate(&config),
            Err(ValidationError::MissingFeedUrl { updater: "server" })
        ));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[remote\nport = ").unwrap();

        assert!(matches!(
            Config::load_unchecked(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
