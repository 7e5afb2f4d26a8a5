//! Release-feed updaters for the agent itself, the java runtime and the server binary
//!
//! A feed is a small JSON document:
//!
//! ```json
//! {"version": "1.21.1", "download_url": "https://example.com/server/latest", "file_type": "jar"}
//! ```
//!
//! `file_type` is optional and names the extension of the downloaded file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use semver::Version;
use serde::Deserialize;
use tracing::{debug, info};

use crate::agent::Shutdown;
use crate::config::{PathsConfig, ReleaseConfig};
use crate::server_process::ServerStatus;
use crate::store::StateStore;
use crate::tasks::{self, Task, TaskContext, TaskError, TaskKind};

use super::UpdateProfile;
use super::download::{DownloadPlan, HttpClient, execute_plan};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub file_type: Option<String>,
}

impl ReleaseInfo {
    /// Lowercase extension without the leading dot
    fn extension(&self) -> Option<String> {
        self.file_type
            .as_deref()
            .map(|t| t.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|t| !t.is_empty())
    }
}

/// What a release updater keeps current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Agent,
    Java,
    Server,
}

impl Component {
    pub fn task_name(&self) -> &'static str {
        match self {
            Component::Agent => "SelfUpdater",
            Component::Java => "JavaUpdater",
            Component::Server => "ServerUpdater",
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Component::Agent => TaskKind::SelfUpdate,
            Component::Java => TaskKind::JavaUpdate,
            Component::Server => TaskKind::ServerUpdate,
        }
    }

    /// Key of the installed version in the store
    pub fn store_key(&self) -> &'static str {
        match self {
            Component::Agent => "agent",
            Component::Java => "java",
            Component::Server => "server",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Component::Agent => "plugkeeper",
            Component::Java => "Java",
            Component::Server => "Server",
        }
    }
}

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches(['v', 'V'])).ok()
}

/// Semantic comparison when both sides parse, plain inequality otherwise.
/// Nothing installed means any release is newer.
pub fn is_newer(latest: &str, installed: Option<&str>) -> bool {
    let Some(installed) = installed else {
        return true;
    };
    match (parse_version(latest), parse_version(installed)) {
        (Some(latest), Some(installed)) => latest > installed,
        _ => latest.trim() != installed.trim(),
    }
}

/// Last path segment of a URL, without query or fragment
fn url_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|segment| !segment.is_empty() && !segment.contains(':'))
}

/// Name for a download with no configured target: the URL's file name, else `<key>-<version>`,
/// suffixed with the feed's file type unless it already ends with it.
fn download_name(store_key: &str, release: &ReleaseInfo) -> String {
    let base = url_file_name(&release.download_url)
        .map(String::from)
        .unwrap_or_else(|| format!("{}-{}", store_key, release.version));
    match release.extension() {
        Some(ext) if !base.to_ascii_lowercase().ends_with(&format!(".{}", ext)) => format!("{}.{}", base, ext),
        _ => base,
    }
}

#[derive(Builder)]
pub struct ReleaseUpdater {
    component: Component,
    config: ReleaseConfig,
    paths: PathsConfig,
    client: Arc<HttpClient>,
    store: StateStore,
    server: Arc<dyn ServerStatus>,
    /// Triggered after an AUTOMATIC self-update launched the staged binary
    shutdown: Option<Shutdown>,
    /// File name of the running executable; resolved from the process when unset
    #[builder(into)]
    exe_name: Option<String>,
}

impl ReleaseUpdater {
    fn installed_version(&self) -> tasks::Result<Option<String>> {
        match self.component {
            Component::Agent => Ok(Some(env!("CARGO_PKG_VERSION").to_string())),
            component => Ok(self.store.installed_version(component.store_key())?),
        }
    }

    fn exe_name(&self) -> tasks::Result<String> {
        if let Some(name) = &self.exe_name {
            return Ok(name.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(exe
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "plugkeeper".to_string()))
    }

    fn target(&self) -> tasks::Result<PathBuf> {
        let target = self.config.target.as_deref().ok_or_else(|| {
            TaskError::Precondition(format!(
                "No target configured for the {} updater",
                self.component.store_key()
            ))
        })?;
        Ok(self.paths.resolve(target))
    }

    /// File name of the staged download
    fn staged_name(&self, release: &ReleaseInfo) -> tasks::Result<String> {
        if self.component == Component::Agent {
            return self.exe_name();
        }
        if let Some(name) = self.config.target.as_deref().and_then(Path::file_name) {
            return Ok(name.to_string_lossy().to_string());
        }
        Ok(download_name(self.component.store_key(), release))
    }

    async fn stage(&self, release: &ReleaseInfo, ctx: &TaskContext) -> tasks::Result<PathBuf> {
        let dest = self.paths.staging_dir().join(self.staged_name(release)?);
        let plan = DownloadPlan::builder()
            .url(release.download_url.clone())
            .dest(dest.clone())
            .build();
        ctx.set_status(format!("Downloading {} {}...", self.component.label(), release.version))?;
        execute_plan(&self.client, &plan, ctx).await?;
        Ok(dest)
    }

    async fn install_self(&self, release: &ReleaseInfo, ctx: &TaskContext) -> tasks::Result<()> {
        let staged = self.stage(release, ctx).await?;
        make_executable(&staged)?;

        let staging = self.paths.staging_dir();
        ctx.set_status("Launching the staged update...")?;
        // Left running after this process exits; tokio reaps it if it finishes first.
        let child = tokio::process::Command::new(&staged)
            .current_dir(&staging)
            .kill_on_drop(false)
            .spawn()?;
        info!(pid = ?child.id(), staged = %staged.display(), "Staged update launched, shutting down");

        if let Some(shutdown) = &self.shutdown {
            shutdown.trigger();
        }
        ctx.finish(format!(
            "Installed update {}, restarting.",
            release.version
        ))
    }

    async fn install_in_place(&self, release: &ReleaseInfo, ctx: &TaskContext) -> tasks::Result<()> {
        let target = self.target()?;
        let plan = DownloadPlan::builder()
            .url(release.download_url.clone())
            .dest(target.clone())
            .replaces(target.clone())
            .replaced_dir(self.paths.replaced_dir())
            .build();
        ctx.set_status(format!("Installing {} {}...", self.component.label(), release.version))?;
        execute_plan(&self.client, &plan, ctx).await?;
        self.store
            .set_installed_version(self.component.store_key(), &release.version)?;
        ctx.finish(format!(
            "Installed {} {} to {}.",
            self.component.label(),
            release.version,
            target.display()
        ))
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl Task for ReleaseUpdater {
    fn name(&self) -> String {
        self.component.task_name().to_string()
    }

    fn kind(&self) -> TaskKind {
        self.component.kind()
    }

    async fn run(&mut self, ctx: TaskContext) -> tasks::Result<()> {
        if !self.config.enabled {
            return ctx.skip("Skipped. Disabled in configuration.");
        }
        if self.component != Component::Agent && self.server.is_running() {
            return Err(TaskError::Precondition(format!(
                "Cannot update {} while server is running!",
                self.component.label()
            )));
        }
        let feed_url = self.config.feed_url.clone().ok_or_else(|| {
            TaskError::Precondition("No feed_url configured".to_string())
        })?;

        ctx.set_status("Fetching release information...")?;
        let body = self.client.fetch(&feed_url).await?;
        let release: ReleaseInfo = serde_json::from_slice(&body)?;
        debug!(component = self.component.store_key(), ?release, "Release feed read");

        let installed = self.installed_version()?;
        if !is_newer(&release.version, installed.as_deref()) {
            return ctx.finish(format!(
                "{} is up to date ({}).",
                self.component.label(),
                release.version
            ));
        }

        let installed = installed.unwrap_or_else(|| "unknown".to_string());
        info!(
            component = self.component.store_key(),
            installed = %installed,
            latest = %release.version,
            profile = %self.config.profile,
            "Release update available"
        );

        match (self.config.profile, self.component) {
            (UpdateProfile::Notify, _) => ctx.finish(format!(
                "Update available ({} -> {}).",
                installed, release.version
            )),
            (UpdateProfile::Manual, _) => {
                let staged = self.stage(&release, &ctx).await?;
                ctx.finish(format!(
                    "Downloaded {} {} to {}.",
                    self.component.label(),
                    release.version,
                    staged.display()
                ))
            }
            (UpdateProfile::Automatic, Component::Agent) => self.install_self(&release, &ctx).await,
            (UpdateProfile::Automatic, _) => self.install_in_place(&release, &ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer_semver() {
        assert!(is_newer("1.10.0", Some("1.9.3")));
        assert!(!is_newer("1.9.3", Some("1.10.0")));
        assert!(!is_newer("v2.0.0", Some("2.0.0")));
        assert!(is_newer("0.1.0", None));
    }

    #[test]
    fn test_is_newer_falls_back_to_inequality() {
        assert!(is_newer("17.0.9+9", Some("17.0.8")));
        assert!(is_newer("build-41", Some("build-40")));
        assert!(!is_newer("build-41", Some("build-41")));
    }

    #[test]
    fn test_release_info_parses() {
        let release: ReleaseInfo =
            serde_json::from_str(r#"{"version": "1.2.0", "download_url": "http://x/plugkeeper"}"#).unwrap();
        assert_eq!(release.version, "1.2.0");
        assert_eq!(release.file_type, None);
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(url_file_name("https://x.org/dl/paper-1.21.jar?sig=1"), Some("paper-1.21.jar"));
        assert_eq!(url_file_name("https://x.org/dl/"), None);
        assert_eq!(url_file_name("https://x.org"), Some("x.org"));
    }

    fn release(url: &str, file_type: Option<&str>) -> ReleaseInfo {
        ReleaseInfo {
            version: "1.21.1".to_string(),
            download_url: url.to_string(),
            file_type: file_type.map(String::from),
        }
    }

    #[test]
    fn test_download_name_uses_file_type() {
        assert_eq!(download_name("server", &release("https://x.org/dl/", Some("jar"))), "server-1.21.1.jar");
        assert_eq!(download_name("server", &release("https://x.org/dl/paper", Some(".JAR"))), "paper.jar");
        assert_eq!(
            download_name("server", &release("https://x.org/dl/paper-1.21.1.jar", Some("jar"))),
            "paper-1.21.1.jar"
        );
        assert_eq!(download_name("java", &release("https://x.org/dl/", None)), "java-1.21.1");
        assert_eq!(download_name("java", &release("https://x.org/dl/", Some("  "))), "java-1.21.1");
    }

    #[test]
    fn test_component_tags() {
        assert_eq!(Component::Agent.kind(), TaskKind::SelfUpdate);
        assert_eq!(Component::Java.store_key(), "java");
        assert_eq!(Component::Server.task_name(), "ServerUpdater");
    }
}
