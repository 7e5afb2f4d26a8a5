use super::models::{Config, ReleaseConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No server key configured (set PLUGKEEPER_SERVER_KEY) but {feature} is enabled")]
    MissingServerKey { feature: &'static str },

    #[error("Port must not be 0: {field}")]
    InvalidPort { field: &'static str },

    #[error("Interval must be positive: {field}")]
    ZeroInterval { field: &'static str },

    #[error("Upload is enabled but {field} is missing")]
    IncompleteUpload { field: &'static str },

    #[error("Release updater '{updater}' is enabled without a feed_url")]
    MissingFeedUrl { updater: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_remote(config)?;
    validate_intervals(config)?;
    validate_upload(config)?;
    validate_releases(config)?;
    Ok(())
}

/// Every online feature needs a key and a reachable port
fn validate_remote(config: &Config) -> Result<(), ValidationError> {
    let key_missing = config.remote.key.as_deref().is_none_or(|k| k.trim().is_empty());
    if key_missing {
        let online = [
            (config.remote.online_console, "the online console"),
            (config.updater.plugins.enabled, "the plugins updater"),
            (config.updater.mods.enabled, "the mods updater"),
        ];
        if let Some((_, feature)) = online.iter().find(|(enabled, _)| *enabled) {
            return Err(ValidationError::MissingServerKey { feature });
        }
    }

    if config.remote.port == 0 {
        return Err(ValidationError::InvalidPort { field: "remote.port" });
    }
    Ok(())
}

fn validate_intervals(config: &Config) -> Result<(), ValidationError> {
    let intervals = [
        (config.updater.interval.is_zero(), "updater.interval"),
        (config.backup.cooldown.is_zero(), "backup.cooldown"),
        (config.remote.connect_timeout.is_zero(), "remote.connect_timeout"),
    ];
    for (zero, field) in intervals {
        if zero {
            return Err(ValidationError::ZeroInterval { field });
        }
    }
    Ok(())
}

fn validate_upload(config: &Config) -> Result<(), ValidationError> {
    let upload = &config.backup.upload;
    if !upload.enabled {
        return Ok(());
    }
    if upload.host.as_deref().is_none_or(|h| h.trim().is_empty()) {
        return Err(ValidationError::IncompleteUpload { field: "backup.upload.host" });
    }
    if upload.user.as_deref().is_none_or(|u| u.trim().is_empty()) {
        return Err(ValidationError::IncompleteUpload { field: "backup.upload.user" });
    }
    if upload.port == 0 {
        return Err(ValidationError::InvalidPort { field: "backup.upload.port" });
    }
    Ok(())
}

fn validate_releases(config: &Config) -> Result<(), ValidationError> {
    let releases: [(&ReleaseConfig, &'static str); 3] = [
        (&config.updater.self_update, "self_update"),
        (&config.updater.java, "java"),
        (&config.updater.server, "server"),
    ];
    for (release, updater) in releases {
        if release.enabled && release.feed_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(ValidationError::MissingFeedUrl { updater });
        }
    }
    Ok(())
}
