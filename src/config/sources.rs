use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "PLUGKEEPER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/plugkeeper.toml";
const ENV_PREFIX: &str = "PLUGKEEPER";
const ENV_SEPARATOR: &str = "__";

const SERVER_KEY_VAR: &str = "PLUGKEEPER_SERVER_KEY";
const UPLOAD_PASSWORD_VAR: &str = "PLUGKEEPER_UPLOAD_PASSWORD";

/// Path of the configuration file: `PLUGKEEPER_CONFIG` or the default location
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_path: PathBuf) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    if let Ok(key) = env::var(SERVER_KEY_VAR) {
        config.remote.key = Some(key);
    }
    if let Ok(password) = env::var(UPLOAD_PASSWORD_VAR) {
        config.backup.upload.password = Some(password);
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // PLUGKEEPER__REMOTE__HOST -> remote.host
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
