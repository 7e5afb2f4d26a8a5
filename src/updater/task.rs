use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use tracing::{debug, info, warn};

use crate::humanize::format_remaining;
use crate::net::SecondaryConnector;
use crate::observability::Metrics;
use crate::server_process::ServerStatus;
use crate::store::StateStore;
use crate::tasks::{self, Task, TaskContext, TaskError, TaskKind};

use super::Catalog;
use super::check::{CycleOutcome, CycleSettings, UpdateCheck};
use super::item::reconcile;
use super::scan::{ScanReport, scan_dir};

/// Checks every installed plugin or mod of one catalog in a single protocol cycle
#[derive(Builder)]
pub struct ItemUpdater {
    catalog: Catalog,
    enabled: bool,
    #[builder(default)]
    keep_removed: bool,
    /// Directory scanned for installed jars
    dir: PathBuf,
    cycle: CycleSettings,
    connector: SecondaryConnector,
    store: StateStore,
    server: Arc<dyn ServerStatus>,
    #[builder(default)]
    metrics: Arc<Metrics>,
}

impl ItemUpdater {
    async fn scan(&self, ctx: &TaskContext) -> tasks::Result<ScanReport> {
        if !self.dir.is_dir() {
            ctx.warn(format!(
                "{} directory {} does not exist",
                self.catalog.label,
                self.dir.display()
            ))?;
            return Ok(ScanReport::default());
        }

        let dir = self.dir.clone();
        let format = self.catalog.format;
        let report = tokio::task::spawn_blocking(move || scan_dir(&dir, format))
            .await
            .map_err(|e| TaskError::Panicked(e.to_string()))??;

        for (path, reason) in &report.problems {
            ctx.warn(format!("Failed to read {}: {}", path.display(), reason))?;
        }
        Ok(report)
    }
}

#[async_trait]
impl Task for ItemUpdater {
    fn name(&self) -> String {
        self.catalog.task_name.to_string()
    }

    fn kind(&self) -> TaskKind {
        self.catalog.task_kind
    }

    async fn run(&mut self, ctx: TaskContext) -> tasks::Result<()> {
        let label = self.catalog.label;
        if !self.enabled {
            return ctx.skip("Skipped. Disabled in configuration.");
        }
        if self.server.is_running() {
            return Err(TaskError::Precondition(format!(
                "Cannot check {} while server is running!",
                label
            )));
        }

        ctx.set_status(format!("Scanning {}...", self.dir.display()))?;
        let report = self.scan(&ctx).await?;

        let stored = self.store.load_items(self.catalog.key)?;
        let reconciled = reconcile(report.found, stored, self.keep_removed);
        for duplicate in &reconciled.duplicates {
            ctx.warn_with_hint(
                format!(
                    "Duplicate {} name '{}' at {}",
                    label,
                    duplicate.name,
                    duplicate.path.display()
                ),
                "Remove one of the copies; only the first one is checked",
            )?;
        }
        let items = reconciled.checkable();
        let mut records = reconciled.records;
        if items.is_empty() {
            debug!(catalog = self.catalog.key, dir = %self.dir.display(), "No checkable items, running an empty cycle");
        }

        ctx.set_status("Connecting to the remote service...")?;
        let connection = self.connector.open().await?;
        let (mut reader, mut writer, _lease) = connection.into_parts();

        let result = UpdateCheck::new(label, &self.cycle, &ctx)
            .run(&mut reader, &mut writer, &items, &mut records)
            .await;
        let _ = writer.shutdown().await;

        match result {
            Ok(CycleOutcome::CooldownActive(remaining)) => ctx.skip(format!(
                "Skipped. Cool-down still active ({} remaining).",
                format_remaining(remaining)
            )),
            Ok(CycleOutcome::Completed(report)) => {
                let store = self.store.clone();
                let key = self.catalog.key;
                tokio::task::spawn_blocking(move || store.save_items(key, &records))
                    .await
                    .map_err(|e| TaskError::Panicked(e.to_string()))??;
                self.metrics.updates_found(report.updates_available as u64);
                info!(
                    catalog = self.catalog.key,
                    checked = report.checked,
                    updates = report.updates_available,
                    downloads = report.downloads.len(),
                    "Update check completed"
                );
                ctx.finish(format!(
                    "Checked {} {} and found {} updates.",
                    report.checked, label, report.updates_available
                ))
            }
            Err(err) => {
                warn!(catalog = self.catalog.key, error = %err, "Update check failed");
                let cause = match err.item() {
                    Some(item) => format!("Connection failed while checking {}", item),
                    None => format!("Connection failed during the {} check", label),
                };
                ctx.warn(cause)?;
                Err(err.into())
            }
        }
    }
}
