//! Cool-down gated backups of the server tree
//!
//! A run prunes expired archives, zips every top-level entry of the source tree into
//! `<app dir>/backups/backup-<dd-MM-yyyy-HH.mm>.zip` and optionally uploads the result.
//! Problems with single entries or the upload become warnings.

pub mod archive;
pub mod error;
pub mod prune;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bon::Builder;
use chrono::Local;
use tracing::{debug, info};

use crate::config::{BackupConfig, PathsConfig};
use crate::cooldown::{BACKUP_KEY, Clock, Cooldown};
use crate::humanize::format_remaining;
use crate::server_process::ServerStatus;
use crate::store::StateStore;
use crate::tasks::{self, Task, TaskContext, TaskError, TaskKind};

pub use archive::{ArchiveWriter, archive_name, top_level_entries};
pub use error::{BackupError, Result};
pub use prune::prune_archives;
pub use upload::{UploadError, Uploader, uploader_for};

#[derive(Builder)]
pub struct BackupTask {
    config: BackupConfig,
    paths: PathsConfig,
    store: StateStore,
    server: Arc<dyn ServerStatus>,
    clock: Arc<dyn Clock>,
}

impl BackupTask {
    fn source(&self) -> PathBuf {
        match &self.config.source {
            Some(source) => self.paths.resolve(source),
            None => self.paths.root.clone(),
        }
    }

    /// Zip every top-level entry; a failing entry is a warning.
    async fn create_archive(&self, ctx: &TaskContext) -> tasks::Result<PathBuf> {
        let source = self.source();
        let app_dir = self.paths.app_dir();
        let dest = self.paths.backups_dir().join(archive_name(&Local::now()));
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> tasks::Result<PathBuf> {
            let entries = top_level_entries(&source, &app_dir).map_err(BackupError::from)?;
            ctx.set_max(entries.len() as u64)?;

            let mut writer = ArchiveWriter::create(&dest, &source, &app_dir)?;
            for entry in &entries {
                let name = entry
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                ctx.set_status(format!("Backing up {}...", name))?;
                if let Err(err) = writer.add(entry) {
                    ctx.warn(format!("Failed to add {} to the backup: {}", name, err))?;
                }
                ctx.step()?;
            }
            Ok(writer.finish()?)
        })
        .await
        .map_err(|e| TaskError::Panicked(e.to_string()))?
    }

    /// Returns true when the upload step ran, successful or not.
    async fn upload(&self, archive: PathBuf, ctx: &TaskContext) -> tasks::Result<bool> {
        let upload = self.config.upload.clone();
        if !upload.enabled {
            return Ok(false);
        }

        let uploader = match uploader_for(&upload) {
            Ok(uploader) => uploader,
            Err(err) => {
                ctx.warn_with_hint(format!("Failed to upload backup: {}", err), "Check the backup.upload settings")?;
                return Ok(true);
            }
        };
        ctx.set_status(format!("Uploading backup over {}...", uploader.protocol()))?;

        let path = archive.clone();
        let result = tokio::task::spawn_blocking(move || uploader.upload(&path))
            .await
            .map_err(|e| TaskError::Panicked(e.to_string()))?;
        match result {
            Ok(_) if upload.delete_on_complete => {
                if let Err(err) = tokio::fs::remove_file(&archive).await {
                    ctx.warn(format!("Failed to delete uploaded backup {}: {}", archive.display(), err))?;
                }
            }
            Ok(_) => {}
            Err(err) => {
                ctx.warn_with_hint(format!("Failed to upload backup: {}", err), "Check the backup.upload settings")?;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Task for BackupTask {
    fn name(&self) -> String {
        "BackupTask".to_string()
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Backup
    }

    async fn run(&mut self, ctx: TaskContext) -> tasks::Result<()> {
        if !self.config.enabled {
            return ctx.skip("Skipped. Disabled in configuration.");
        }
        if self.server.is_running() {
            return Err(TaskError::Precondition(
                "Cannot perform backup while server is running!".to_string(),
            ));
        }

        let now = self.clock.now();
        let cooldown = Cooldown::new(self.config.cooldown.as_duration(), self.store.last_run(BACKUP_KEY)?);
        let remaining = cooldown.remaining_at(now);
        if !remaining.is_zero() {
            return ctx.skip(format!(
                "Skipped. Cool-down still active ({} remaining).",
                format_remaining(remaining)
            ));
        }
        self.store.record_run(BACKUP_KEY, now)?;

        let max_days = self.config.max_days;
        if max_days == 0 {
            ctx.set_status("Skipping delete of older backups...")?;
        } else {
            ctx.set_status(format!("Deleting backups older than {} days...", max_days))?;
            let dir = self.paths.backups_dir();
            let deleted = tokio::task::spawn_blocking(move || prune_archives(&dir, max_days, SystemTime::now()))
                .await
                .map_err(|e| TaskError::Panicked(e.to_string()))?;
            debug!(deleted, max_days, "Pruned old backups");
        }

        ctx.set_status("Creating backup zip...")?;
        let archive = self.create_archive(&ctx).await?;
        info!(archive = %archive.display(), "Backup created");

        let uploaded = self.upload(archive, &ctx).await?;
        let mut status = if uploaded {
            "Completed backup & upload".to_string()
        } else {
            "Completed backup & skipped upload".to_string()
        };
        let warnings = ctx.warning_count();
        if warnings > 0 {
            status.push_str(&format!(" ({} warnings)", warnings));
        }
        status.push('.');
        ctx.finish(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::ManualClock;
    use crate::tasks::{Outcome, TaskManager};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        paths: PathsConfig,
        store: StateStore,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = PathsConfig {
            root: temp.path().to_path_buf(),
            ..PathsConfig::default()
        };
        std::fs::write(paths.root.join("server.properties"), "motd=hi").unwrap();
        std::fs::create_dir_all(paths.root.join("world")).unwrap();
        std::fs::write(paths.root.join("world/level.dat"), [0u8; 16]).unwrap();
        let store = StateStore::open(paths.state_dir()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()));
        Fixture {
            _temp: temp,
            paths,
            store,
            clock,
        }
    }

    fn task(fixture: &Fixture, enabled: bool, running: bool) -> BackupTask {
        BackupTask::builder()
            .config(BackupConfig {
                enabled,
                cooldown: Duration::from_secs(3600).into(),
                ..BackupConfig::default()
            })
            .paths(fixture.paths.clone())
            .store(fixture.store.clone())
            .server(Arc::new(AtomicBool::new(running)))
            .clock(fixture.clock.clone())
            .build()
    }

    #[tokio::test]
    async fn test_backup_then_cooldown_skip() {
        let fixture = fixture();
        let manager = TaskManager::new("backup");

        let first = manager.start(task(&fixture, true, false));
        assert_eq!(first.wait().await, Outcome::Finished);
        assert_eq!(first.snapshot().status, "Completed backup & skipped upload.");
        let archives: Vec<_> = std::fs::read_dir(fixture.paths.backups_dir()).unwrap().collect();
        assert_eq!(archives.len(), 1);
        assert!(fixture.store.last_run(BACKUP_KEY).unwrap().is_some());

        fixture.clock.advance(Duration::from_secs(600));
        let second = manager.start(task(&fixture, true, false));
        assert_eq!(second.wait().await, Outcome::Skipped);
        assert_eq!(
            second.snapshot().status,
            "Skipped. Cool-down still active (50 minutes remaining)."
        );
    }

    #[tokio::test]
    async fn test_server_running_fails_not_skips() {
        let fixture = fixture();
        let manager = TaskManager::new("backup");
        let handle = manager.start(task(&fixture, true, true));
        assert_eq!(handle.wait().await, Outcome::Failed);
        let snapshot = handle.snapshot();
        assert!(snapshot.warnings[0].fatal);
        assert!(snapshot.warnings[0].cause.contains("server is running"));
        assert!(fixture.store.last_run(BACKUP_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_skips() {
        let fixture = fixture();
        let manager = TaskManager::new("backup");
        let handle = manager.start(task(&fixture, false, true));
        assert_eq!(handle.wait().await, Outcome::Skipped);
    }

    #[tokio::test]
    async fn test_failed_upload_is_a_warning() {
        let fixture = fixture();
        let manager = TaskManager::new("backup");
        let mut config = BackupConfig {
            enabled: true,
            ..BackupConfig::default()
        };
        config.upload.enabled = true;
        config.upload.host = Some("127.0.0.1".to_string());
        config.upload.port = 1;
        config.upload.user = Some("mc".to_string());

        let handle = manager.start(
            BackupTask::builder()
                .config(config)
                .paths(fixture.paths.clone())
                .store(fixture.store.clone())
                .server(Arc::new(AtomicBool::new(false)))
                .clock(fixture.clock.clone())
                .build(),
        );
        assert_eq!(handle.wait().await, Outcome::FinishedWithWarnings);
        assert_eq!(handle.snapshot().status, "Completed backup & upload (1 warnings).");
    }
}
