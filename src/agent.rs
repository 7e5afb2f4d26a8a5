//! The long-running agent
//!
//! Owns the shared services (state store, connections, server process, HTTP client) and
//! drives the recurring update and backup cohorts plus the operator console until shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backup::BackupTask;
use crate::config::{CatalogConfig, Config, ReleaseConfig};
use crate::console::{self, CommandExecutor, ConsoleCommand, HELP};
use crate::cooldown::{BACKUP_KEY, Clock, Cooldown, SystemClock, UPDATER_KEY, wait_for_expiry};
use crate::net::{CommandSink, Connections, Credentials, Endpoint, OnlineConsole, SecondaryConnector, TransportOptions};
use crate::observability::Metrics;
use crate::server_process::{ServerProcess, ServerStatus};
use crate::store::{StateStore, StoreError};
use crate::tasks::{CohortSummary, Outcome, TaskManager, log_summary, spawn_progress_printer};
use crate::updater::{
    Catalog, Component, CycleSettings, DownloadError, HttpClient, HttpConfig, ItemUpdater, ReleaseUpdater,
};

/// How often running tasks are logged while a cohort is in flight
const PROGRESS_EVERY: Duration = Duration::from_secs(30);
/// Pause before a recurring cohort that made no progress is retried
const RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to open state store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] DownloadError),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Process-wide shutdown request
#[derive(Clone)]
pub struct Shutdown {
    requested: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
        }
    }

    pub fn trigger(&self) {
        self.requested.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.requested.borrow()
    }

    pub async fn wait(&self) {
        let mut requested = self.requested.subscribe();
        let _ = requested.wait_for(|requested| *requested).await;
    }
}

pub struct Agent {
    config: Config,
    store: StateStore,
    connections: Arc<Connections>,
    server: Arc<ServerProcess>,
    http: Arc<HttpClient>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    update_lock: Mutex<()>,
    backup_lock: Mutex<()>,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self> {
        let store = StateStore::open(config.paths.state_dir())?;

        let credentials = config
            .remote
            .key
            .as_ref()
            .map(|key| Credentials::new(key.clone(), format!("plugkeeper/{}", env!("CARGO_PKG_VERSION"))));
        let options = TransportOptions {
            connect_timeout: config.remote.connect_timeout.as_duration(),
            read_timeout: Some(config.remote.read_timeout.as_duration()),
        };
        let connections = Arc::new(Connections::new(
            Endpoint::new(config.remote.host.clone(), config.remote.port),
            credentials,
            options,
        ));

        let server = Arc::new(ServerProcess::new(config.server.clone(), config.paths.root.clone()));
        let http = Arc::new(HttpClient::new(HttpConfig::default())?);

        Ok(Self {
            config,
            store,
            connections,
            server,
            http,
            metrics: Arc::new(Metrics::new()),
            clock: Arc::new(SystemClock),
            shutdown: Shutdown::new(),
            update_lock: Mutex::new(()),
            backup_lock: Mutex::new(()),
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Open the primary connection if any feature needs the remote service. Failure is logged.
    pub async fn connect(&self) {
        if !self.config.uses_remote() {
            return;
        }
        if let Err(err) = self.connections.open_primary().await {
            warn!(endpoint = %self.connections.endpoint(), error = %err, "Failed to open primary connection");
        }
    }

    /// Run until ctrl-c, SIGTERM, `.exit` or a self-update restart.
    pub async fn run(self: Arc<Self>) {
        self.connect().await;

        if self.config.server.auto_start {
            if let Err(err) = self.server.start().await {
                warn!(error = %err, "Failed to auto-start server");
            }
        }

        let (executor, mut commands) = CommandExecutor::channel();
        let executor: Arc<dyn CommandSink> = Arc::new(executor);
        let stdin = console::spawn_stdin_reader(Arc::clone(&executor));

        let online = if self.config.remote.online_console {
            match OnlineConsole::open(&self.connections, Arc::clone(&executor)).await {
                Ok(console) => Some(Arc::new(console)),
                Err(err) => {
                    warn!(error = %err, "Failed to open online console");
                    None
                }
            }
        } else {
            None
        };
        let forwarder = online.as_ref().map(|console| self.forward_output(Arc::clone(console)));

        let mut loops: Vec<JoinHandle<()>> = Vec::new();
        if self.config.updater.recurring {
            loops.push(tokio::spawn(Arc::clone(&self).update_loop()));
        }
        if self.config.backup.enabled {
            loops.push(tokio::spawn(Arc::clone(&self).backup_loop()));
        }
        info!("plugkeeper running, enter .help for a list of commands");

        let signal = shutdown_signal();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                _ = self.shutdown.wait() => {
                    info!("Shutdown requested");
                    break;
                }
                Some(command) = commands.recv() => {
                    if command == ConsoleCommand::Exit {
                        break;
                    }
                    Arc::clone(&self).handle_command(command, online.clone()).await;
                }
            }
        }

        for handle in loops {
            handle.abort();
        }
        stdin.abort();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
            let _ = forwarder.await;
        }
        if let Some(console) = online.and_then(|console| Arc::try_unwrap(console).ok()) {
            console.close().await;
        }
        self.connections.close_primary().await;
        if let Err(err) = self.store.persist() {
            error!(error = %err, "Failed to persist state store");
        }
        info!("plugkeeper stopped");
    }

    fn forward_output(&self, console: Arc<OnlineConsole>) -> JoinHandle<()> {
        let mut output = self.server.subscribe_output();
        tokio::spawn(async move {
            loop {
                match output.recv().await {
                    Ok(line) => {
                        if let Err(err) = console.send_line(&line).await {
                            warn!(error = %err, "Failed to forward server output");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Online console fell behind server output");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn reply(&self, online: Option<&OnlineConsole>, message: &str) {
        for line in message.lines() {
            info!("{}", line);
        }
        if let Some(console) = online {
            if let Err(err) = console.send_line(message).await {
                warn!(error = %err, "Failed to reply on online console");
            }
        }
    }

    async fn handle_command(self: Arc<Self>, command: ConsoleCommand, online: Option<Arc<OnlineConsole>>) {
        let online_ref = online.as_deref();
        match command {
            ConsoleCommand::Help => self.reply(online_ref, HELP).await,
            ConsoleCommand::Start => match self.server.start().await {
                Ok(()) => self.reply(online_ref, "Server started.").await,
                Err(err) => self.reply(online_ref, &format!("Failed to start server: {}", err)).await,
            },
            ConsoleCommand::Stop => {
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    let message = match agent.server.stop().await {
                        Ok(()) => "Server stopped.".to_string(),
                        Err(err) => format!("Failed to stop server: {}", err),
                    };
                    agent.reply(online.as_deref(), &message).await;
                });
            }
            ConsoleCommand::Kill => match self.server.kill().await {
                Ok(()) => self.reply(online_ref, "Server killed.").await,
                Err(err) => self.reply(online_ref, &format!("Failed to kill server: {}", err)).await,
            },
            ConsoleCommand::Check => {
                self.reply(online_ref, "Starting update checks...").await;
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    let message = match agent.run_update_cohort().await {
                        Some(summary) => summary_line(&summary),
                        None => "Update checks are already running.".to_string(),
                    };
                    agent.reply(online.as_deref(), &message).await;
                });
            }
            ConsoleCommand::Backup => {
                self.reply(online_ref, "Starting backup...").await;
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    let message = match agent.run_backup_cohort().await {
                        Some(summary) => summary_line(&summary),
                        None => "A backup is already running.".to_string(),
                    };
                    agent.reply(online.as_deref(), &message).await;
                });
            }
            ConsoleCommand::Status => {
                let status = self.status();
                self.reply(online_ref, &status).await;
            }
            ConsoleCommand::Exit => self.shutdown.trigger(),
            ConsoleCommand::Unknown(word) => {
                self.reply(
                    online_ref,
                    &format!("Unknown command '{}'. Enter .help for a list of commands.", word),
                )
                .await
            }
            ConsoleCommand::Forward(line) => {
                if let Err(err) = self.server.send_line(&line).await {
                    self.reply(online_ref, &format!("Cannot send to server: {}", err)).await;
                }
            }
        }
    }

    fn status(&self) -> String {
        let last_run = |key: &str| match self.store.last_run(key) {
            Ok(Some(at)) => at.to_rfc3339(),
            Ok(None) => "never".to_string(),
            Err(err) => format!("unknown ({})", err),
        };
        let metrics = self.metrics.snapshot();
        format!(
            "Server running: {}\nRemote connection: {:?}\nLast update check: {}\nLast backup: {}\nCycles run: {}, updates found: {}, tasks failed: {}",
            self.server.is_running(),
            self.connections.primary_state(),
            last_run(UPDATER_KEY),
            last_run(BACKUP_KEY),
            metrics.cycles_run,
            metrics.updates_found,
            metrics.tasks_failed,
        )
    }

    async fn update_loop(self: Arc<Self>) {
        let interval = self.config.updater.interval.as_duration();
        loop {
            let last_run = self.last_run_or_log(UPDATER_KEY);
            wait_for_expiry(&Cooldown::new(interval, last_run), self.clock.as_ref()).await;
            if self.run_update_cohort().await.is_none() {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    async fn backup_loop(self: Arc<Self>) {
        let cooldown = self.config.backup.cooldown.as_duration();
        loop {
            let last_run = self.last_run_or_log(BACKUP_KEY);
            wait_for_expiry(&Cooldown::new(cooldown, last_run), self.clock.as_ref()).await;
            self.run_backup_cohort().await;
            // A failed precondition records no run; back off instead of spinning.
            if self.last_run_or_log(BACKUP_KEY) == last_run {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    fn last_run_or_log(&self, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.store.last_run(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "Failed to read last run, treating as never run");
            None
        })
    }

    /// Run one update cohort. `None` when another one is still running.
    ///
    /// The self-updater runs alone first; when it restarts the agent nothing else is started.
    pub async fn run_update_cohort(&self) -> Option<CohortSummary> {
        let _guard = self.update_lock.try_lock().ok()?;
        if let Err(err) = self.store.record_run(UPDATER_KEY, self.clock.now()) {
            warn!(error = %err, "Failed to record update run");
        }
        self.connect_if_closed().await;

        let manager = TaskManager::new("updates");
        let printer = spawn_progress_printer(manager.clone(), PROGRESS_EVERY);

        let self_update = manager.start(self.release_updater(Component::Agent, &self.config.updater.self_update));
        self_update.wait().await;

        if !self.shutdown.is_triggered() {
            manager.start(self.release_updater(Component::Java, &self.config.updater.java));
            manager.start(self.release_updater(Component::Server, &self.config.updater.server));
            let paths = &self.config.paths;
            manager.start(self.item_updater(Catalog::PLUGINS, &self.config.updater.plugins, paths.plugins_dir()));
            manager.start(self.item_updater(Catalog::MODS, &self.config.updater.mods, paths.mods_dir()));
        }

        manager.wait_until_finished().await;
        printer.abort();
        Some(self.conclude(manager))
    }

    /// Run one backup cohort. `None` when another one is still running.
    pub async fn run_backup_cohort(&self) -> Option<CohortSummary> {
        let _guard = self.backup_lock.try_lock().ok()?;
        let manager = TaskManager::new("backup");
        let printer = spawn_progress_printer(manager.clone(), PROGRESS_EVERY);

        manager.start(
            BackupTask::builder()
                .config(self.config.backup.clone())
                .paths(self.config.paths.clone())
                .store(self.store.clone())
                .server(self.server.clone())
                .clock(Arc::clone(&self.clock))
                .build(),
        );

        manager.wait_until_finished().await;
        printer.abort();
        Some(self.conclude(manager))
    }

    fn conclude(&self, manager: TaskManager) -> CohortSummary {
        let summary = manager.summary();
        log_summary(&summary);
        self.metrics.record_cohort(&summary);
        if let Err(err) = self.store.persist() {
            warn!(error = %err, "Failed to persist state store");
        }
        summary
    }

    async fn connect_if_closed(&self) {
        if self.connections.primary_state() == crate::net::ConnectionState::Closed {
            self.connect().await;
        }
    }

    fn release_updater(&self, component: Component, config: &ReleaseConfig) -> ReleaseUpdater {
        ReleaseUpdater::builder()
            .component(component)
            .config(config.clone())
            .paths(self.config.paths.clone())
            .client(Arc::clone(&self.http))
            .store(self.store.clone())
            .server(self.server.clone())
            .shutdown(self.shutdown.clone())
            .build()
    }

    fn item_updater(&self, catalog: Catalog, config: &CatalogConfig, dir: std::path::PathBuf) -> ItemUpdater {
        let paths = &self.config.paths;
        ItemUpdater::builder()
            .catalog(catalog)
            .enabled(config.enabled)
            .keep_removed(config.keep_removed)
            .dir(dir.clone())
            .cycle(CycleSettings {
                profile: config.profile,
                staging_dir: paths.staging_dir(),
                install_dir: dir,
                replaced_dir: paths.replaced_dir(),
                client: Arc::clone(&self.http),
            })
            .connector(SecondaryConnector::new(Arc::clone(&self.connections), catalog.secondary))
            .store(self.store.clone())
            .server(self.server.clone())
            .metrics(Arc::clone(&self.metrics))
            .build()
    }
}

/// One-line cohort result for console replies
pub fn summary_line(summary: &CohortSummary) -> String {
    format!(
        "{} finished: {} ok, {} with warnings, {} skipped, {} failed ({} warnings).",
        summary.name,
        summary.count(Outcome::Finished),
        summary.count(Outcome::FinishedWithWarnings),
        summary.count(Outcome::Skipped),
        summary.count(Outcome::Failed),
        summary.warning_count(),
    )
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskSnapshot;
    use crate::tasks::TaskKind;

    #[tokio::test]
    async fn test_shutdown_handle() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        shutdown.trigger();
        waiter.await.unwrap();
        assert!(shutdown.is_triggered());
        // Waiting after the fact returns immediately.
        shutdown.wait().await;
    }

    #[test]
    fn test_summary_line() {
        let task = |name: &str, outcome| TaskSnapshot {
            name: name.to_string(),
            kind: TaskKind::Backup,
            status: String::new(),
            current: 0,
            max: None,
            warnings: Vec::new(),
            outcome,
        };
        let summary = CohortSummary {
            name: "updates".to_string(),
            tasks: vec![task("a", Outcome::Finished), task("b", Outcome::Skipped)],
        };
        assert_eq!(
            summary_line(&summary),
            "updates finished: 1 ok, 0 with warnings, 1 skipped, 0 failed (0 warnings)."
        );
    }

    #[tokio::test]
    async fn test_offline_backup_cohort() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.root = temp.path().to_path_buf();
        config.remote.online_console = false;
        config.updater.plugins.enabled = false;
        config.backup.enabled = true;
        std::fs::write(temp.path().join("server.properties"), "motd=hi").unwrap();

        let agent = Agent::new(config).unwrap();
        let summary = agent.run_backup_cohort().await.unwrap();
        assert_eq!(summary.count(Outcome::Finished), 1);
        assert_eq!(agent.metrics().snapshot().cycles_run, 1);
    }
}
