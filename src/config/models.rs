use crate::humanize::HumanDuration;
use crate::updater::UpdateProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the agent's own data directory under the server root
pub const APP_DIR: &str = ".plugkeeper";
/// Staging directory for downloads, relative to the app dir
pub const STAGING_DIR: &str = "downloads";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote service endpoint and transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_host")]
    pub host: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// Server key (loaded from environment, not from config file)
    #[serde(skip)]
    pub key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: HumanDuration,
    #[serde(default = "default_true")]
    pub online_console: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            key: None,
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            online_console: true,
        }
    }
}

fn default_remote_host() -> String {
    "127.0.0.1".to_string()
}

fn default_remote_port() -> u16 {
    35555
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_read_timeout() -> HumanDuration {
    HumanDuration::from_mins(2)
}

fn default_true() -> bool {
    true
}

/// Server root and item directories
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Server root; also the backup source unless `backup.source` is set
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Relative paths resolve against `root`
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
    #[serde(default = "default_mods_dir")]
    pub mods_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            plugins_dir: default_plugins_dir(),
            mods_dir: default_mods_dir(),
        }
    }
}

impl PathsConfig {
    pub fn app_dir(&self) -> PathBuf {
        self.root.join(APP_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.app_dir().join(STAGING_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.app_dir().join("backups")
    }

    pub fn replaced_dir(&self) -> PathBuf {
        self.app_dir().join("replaced")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.app_dir().join("state")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.resolve(&self.plugins_dir)
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.resolve(&self.mods_dir)
    }

    /// Resolve a configured path against the server root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_mods_dir() -> PathBuf {
    PathBuf::from("mods")
}

/// Managed server process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Executable to start; `None` disables `.start`
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub auto_start: bool,
    /// Line written to the server's stdin by `.stop`
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Grace period after the stop command before the process is killed
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: HumanDuration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            auto_start: false,
            stop_command: default_stop_command(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_stop_timeout() -> HumanDuration {
    HumanDuration::from_mins(1)
}

/// Recurring update checks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdaterConfig {
    /// Run update cohorts on a timer; otherwise only on `.check`
    #[serde(default = "default_true")]
    pub recurring: bool,
    #[serde(default = "default_update_interval")]
    pub interval: HumanDuration,
    #[serde(default = "default_plugins_catalog")]
    pub plugins: CatalogConfig,
    #[serde(default)]
    pub mods: CatalogConfig,
    #[serde(default)]
    pub self_update: ReleaseConfig,
    #[serde(default)]
    pub java: ReleaseConfig,
    #[serde(default)]
    pub server: ReleaseConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            recurring: true,
            interval: default_update_interval(),
            plugins: default_plugins_catalog(),
            mods: CatalogConfig::default(),
            self_update: ReleaseConfig::default(),
            java: ReleaseConfig::default(),
            server: ReleaseConfig::default(),
        }
    }
}

fn default_update_interval() -> HumanDuration {
    HumanDuration::from_hours(4)
}

fn default_plugins_catalog() -> CatalogConfig {
    CatalogConfig {
        enabled: true,
        ..CatalogConfig::default()
    }
}

/// Plugin or mod catalog settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub profile: UpdateProfile,
    /// Retain records of uninstalled items
    #[serde(default)]
    pub keep_removed: bool,
}

/// Self, java or server release feed
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub profile: UpdateProfile,
    /// URL of the JSON release descriptor
    pub feed_url: Option<String>,
    /// File replaced by AUTOMATIC installs (java and server only), relative to the root
    pub target: Option<PathBuf>,
}

/// Backups
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_cooldown")]
    pub cooldown: HumanDuration,
    /// Archives older than this many days are pruned; 0 keeps everything
    #[serde(default = "default_max_days")]
    pub max_days: u32,
    /// Tree to archive; defaults to the server root
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown: default_backup_cooldown(),
            max_days: default_max_days(),
            source: None,
            upload: UploadConfig::default(),
        }
    }
}

fn default_backup_cooldown() -> HumanDuration {
    HumanDuration::from_hours(24)
}

fn default_max_days() -> u32 {
    7
}

/// Remote transfer of finished archives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub enabled: bool,
    pub host: Option<String>,
    #[serde(default = "default_upload_port")]
    pub port: u16,
    pub user: Option<String>,
    /// Password (loaded from environment, not from config file)
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    /// SFTP is used when set, FTPS otherwise
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub delete_on_complete: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: default_upload_port(),
            user: None,
            password: None,
            remote_path: default_remote_path(),
            private_key: None,
            delete_on_complete: false,
        }
    }
}

fn default_upload_port() -> u16 {
    22
}

fn default_remote_path() -> String {
    "/".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// True when any feature needs the remote service.
    pub fn uses_remote(&self) -> bool {
        self.remote.online_console || self.updater.plugins.enabled || self.updater.mods.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.remote.port, 35555);
        assert_eq!(config.updater.interval.as_duration(), Duration::from_secs(4 * 3600));
        assert!(config.updater.plugins.enabled);
        assert!(!config.updater.mods.enabled);
        assert_eq!(config.updater.plugins.profile, UpdateProfile::Manual);
        assert_eq!(config.backup.max_days, 7);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_paths() {
        let paths = PathsConfig {
            root: PathBuf::from("/srv/mc"),
            ..PathsConfig::default()
        };
        assert_eq!(paths.staging_dir(), PathBuf::from("/srv/mc/.plugkeeper/downloads"));
        assert_eq!(paths.plugins_dir(), PathBuf::from("/srv/mc/plugins"));
        assert_eq!(paths.resolve(Path::new("/abs/mods")), PathBuf::from("/abs/mods"));
    }
}
