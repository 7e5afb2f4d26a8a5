//! Concurrent task execution
//!
//! A [`Task`] is a fallible unit of work started exactly once by a [`TaskManager`]. Every task
//! runs on its own tokio task behind a failure boundary: an error or a panic in the body marks
//! the task failed and records a fatal [`Warning`], it never reaches sibling tasks or the
//! manager. Status, progress and warnings are published through shared state that observers
//! may read while the body runs.

mod context;
mod error;
mod manager;
mod printer;
mod state;

use std::fmt;

use async_trait::async_trait;

pub use context::TaskContext;
pub use error::{Result, TaskError};
pub use manager::{CohortSummary, TaskManager};
pub use printer::{log_summary, spawn_progress_printer};
pub use state::{Outcome, TaskHandle, TaskSnapshot, Warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SelfUpdate,
    JavaUpdate,
    ServerUpdate,
    PluginUpdate,
    ModUpdate,
    Backup,
    Download,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SelfUpdate => "self-update",
            TaskKind::JavaUpdate => "java-update",
            TaskKind::ServerUpdate => "server-update",
            TaskKind::PluginUpdate => "plugin-update",
            TaskKind::ModUpdate => "mod-update",
            TaskKind::Backup => "backup",
            TaskKind::Download => "download",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work run by a [`TaskManager`].
///
/// Returning `Ok(())` without calling [`TaskContext::finish`] or [`TaskContext::skip`] finishes
/// the task with its last status message.
#[async_trait]
pub trait Task: Send + 'static {
    fn name(&self) -> String;

    fn kind(&self) -> TaskKind;

    async fn run(&mut self, ctx: TaskContext) -> Result<()>;
}
