use std::sync::Arc;

use super::error::Result;
use super::manager::TaskManager;
use super::state::{TaskHandle, TaskState, Warning};
use super::Task;

/// Reporting handle given to a running task body.
///
/// Cheap to clone, so blocking sections (archive creation, pruning) can carry their own copy
/// into `spawn_blocking`.
#[derive(Clone)]
pub struct TaskContext {
    state: Arc<TaskState>,
    manager: TaskManager,
}

impl TaskContext {
    pub(crate) fn new(state: Arc<TaskState>, manager: TaskManager) -> Self {
        Self { state, manager }
    }

    pub fn name(&self) -> String {
        self.state.name()
    }

    pub fn set_status(&self, status: impl Into<String>) -> Result<()> {
        let status = status.into();
        tracing::debug!(task = %self.name(), %status, "Task status");
        self.state.set_status(status)
    }

    /// Set the progress maximum. Allowed once per run.
    pub fn set_max(&self, max: u64) -> Result<()> {
        self.state.set_max(max)
    }

    pub fn step(&self) -> Result<u64> {
        self.state.step_by(1)
    }

    pub fn step_by(&self, amount: u64) -> Result<u64> {
        self.state.step_by(amount)
    }

    /// Record a non-fatal warning.
    pub fn warn(&self, cause: impl Into<String>) -> Result<()> {
        self.push_warning(Warning::new(self.name(), cause))
    }

    /// Record a non-fatal warning with a remediation hint for the operator.
    pub fn warn_with_hint(&self, cause: impl Into<String>, hint: impl Into<String>) -> Result<()> {
        self.push_warning(Warning::new(self.name(), cause).with_hint(hint))
    }

    fn push_warning(&self, warning: Warning) -> Result<()> {
        tracing::warn!(task = %warning.task, cause = %warning.cause, hint = ?warning.hint, "Task warning");
        self.state.warn(warning)
    }

    pub fn warning_count(&self) -> usize {
        self.state.warning_count()
    }

    pub fn finish(&self, message: impl Into<String>) -> Result<()> {
        self.state.finish(Some(message.into()))
    }

    pub fn skip(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        tracing::info!(task = %self.name(), %reason, "Task skipped");
        self.state.skip(reason)
    }

    /// Start a nested task in the same cohort.
    pub fn spawn<T: Task>(&self, task: T) -> TaskHandle {
        self.manager.start(task)
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }
}
