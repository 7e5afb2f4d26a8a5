use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;

use super::TaskKind;
use super::error::{Result, TaskError};

/// Terminal (or not yet terminal) outcome of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Finished,
    FinishedWithWarnings,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Running => "running",
            Outcome::Finished => "finished",
            Outcome::FinishedWithWarnings => "finished with warnings",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem recorded by a task. Only the warning recorded on failure is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub task: String,
    pub cause: String,
    pub hint: Option<String>,
    pub fatal: bool,
}

impl Warning {
    pub fn new(task: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            cause: cause.into(),
            hint: None,
            fatal: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub(crate) fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.task, self.cause)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

/// Point-in-time copy of a task's observable state
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: String,
    pub kind: TaskKind,
    pub status: String,
    pub current: u64,
    pub max: Option<u64>,
    pub warnings: Vec<Warning>,
    pub outcome: Outcome,
}

impl TaskSnapshot {
    pub fn percent(&self) -> Option<u64> {
        match self.max {
            Some(0) => Some(100),
            Some(max) => Some(self.current.saturating_mul(100) / max),
            None => None,
        }
    }
}

/// Shared, lock-guarded state of a single task.
///
/// The running body is the only writer; any number of observers may read concurrently.
pub(crate) struct TaskState {
    inner: RwLock<TaskSnapshot>,
    notifier: Arc<watch::Sender<u64>>,
}

impl TaskState {
    pub(crate) fn new(name: String, kind: TaskKind, notifier: Arc<watch::Sender<u64>>) -> Self {
        Self {
            inner: RwLock::new(TaskSnapshot {
                name,
                kind,
                status: "Initialising...".to_string(),
                current: 0,
                max: None,
                warnings: Vec::new(),
                outcome: Outcome::Running,
            }),
            notifier,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for writing, rejecting the write if the task is already terminal.
    fn write_running(&self) -> Result<RwLockWriteGuard<'_, TaskSnapshot>> {
        let guard = self.write();
        if guard.outcome.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                task: guard.name.clone(),
            });
        }
        Ok(guard)
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        self.read().clone()
    }

    pub(crate) fn name(&self) -> String {
        self.read().name.clone()
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.read().outcome
    }

    pub(crate) fn set_status(&self, status: String) -> Result<()> {
        self.write_running()?.status = status;
        Ok(())
    }

    pub(crate) fn set_max(&self, max: u64) -> Result<()> {
        let mut state = self.write_running()?;
        if state.max.is_some() {
            return Err(TaskError::MaxAlreadySet {
                task: state.name.clone(),
            });
        }
        state.max = Some(max.max(state.current));
        Ok(())
    }

    pub(crate) fn step_by(&self, amount: u64) -> Result<u64> {
        let mut state = self.write_running()?;
        let next = state.current.saturating_add(amount);
        state.current = match state.max {
            Some(max) => next.min(max),
            None => next,
        };
        Ok(state.current)
    }

    pub(crate) fn warn(&self, warning: Warning) -> Result<()> {
        self.write_running()?.warnings.push(warning);
        Ok(())
    }

    pub(crate) fn warning_count(&self) -> usize {
        self.read().warnings.len()
    }

    pub(crate) fn finish(&self, message: Option<String>) -> Result<()> {
        {
            let mut state = self.write_running()?;
            state.outcome = if state.warnings.is_empty() {
                Outcome::Finished
            } else {
                Outcome::FinishedWithWarnings
            };
            if let Some(message) = message {
                state.status = message;
            }
            if let Some(max) = state.max {
                state.current = max;
            }
        }
        self.notify();
        Ok(())
    }

    pub(crate) fn skip(&self, reason: String) -> Result<()> {
        {
            let mut state = self.write_running()?;
            state.outcome = Outcome::Skipped;
            state.status = reason;
        }
        self.notify();
        Ok(())
    }

    pub(crate) fn fail(&self, cause: String) -> Result<()> {
        {
            let mut state = self.write_running()?;
            let warning = Warning::new(state.name.clone(), cause.clone()).fatal();
            state.warnings.push(warning);
            state.outcome = Outcome::Failed;
            state.status = format!("Failed: {}", cause);
        }
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        self.notifier.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

/// Observer handle for a started task
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
    poll_interval: Duration,
}

impl TaskHandle {
    pub(crate) fn new(state: Arc<TaskState>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
        }
    }

    pub fn name(&self) -> String {
        self.state.name()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.snapshot()
    }

    pub fn outcome(&self) -> Outcome {
        self.state.outcome()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_terminal()
    }

    /// Wait until this task reaches a terminal state and return the outcome.
    pub async fn wait(&self) -> Outcome {
        let mut changes = self.state.notifier.subscribe();
        loop {
            let outcome = self.outcome();
            if outcome.is_terminal() {
                return outcome;
            }
            let _ = tokio::time::timeout(self.poll_interval, changes.changed()).await;
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("TaskHandle")
            .field("name", &snapshot.name)
            .field("outcome", &snapshot.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TaskState {
        let (tx, _rx) = watch::channel(0);
        TaskState::new("test".to_string(), TaskKind::Download, Arc::new(tx))
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let state = state();
        assert_eq!(state.step_by(3).unwrap(), 3);
        state.set_max(5).unwrap();
        assert_eq!(state.step_by(1).unwrap(), 4);
        assert_eq!(state.step_by(10).unwrap(), 5);
        assert_eq!(state.step_by(1).unwrap(), 5);
    }

    #[test]
    fn test_max_set_once() {
        let state = state();
        state.set_max(2).unwrap();
        assert!(matches!(state.set_max(3), Err(TaskError::MaxAlreadySet { .. })));
    }

    #[test]
    fn test_max_never_below_current() {
        let state = state();
        state.step_by(7).unwrap();
        state.set_max(5).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.max, Some(7));
        assert_eq!(snapshot.current, 7);
    }

    #[test]
    fn test_terminal_exclusivity() {
        let state = state();
        state.finish(Some("done".to_string())).unwrap();
        assert!(matches!(state.finish(None), Err(TaskError::AlreadyTerminal { .. })));
        assert!(matches!(
            state.skip("late".to_string()),
            Err(TaskError::AlreadyTerminal { .. })
        ));
        assert!(state.set_status("late".to_string()).is_err());
        assert!(state.step_by(1).is_err());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.outcome, Outcome::Finished);
        assert_eq!(snapshot.status, "done");
    }

    #[test]
    fn test_finish_with_warnings() {
        let state = state();
        state.warn(Warning::new("test", "careful")).unwrap();
        state.finish(None).unwrap();
        assert_eq!(state.outcome(), Outcome::FinishedWithWarnings);
    }

    #[test]
    fn test_fail_records_fatal_warning() {
        let state = state();
        state.fail("boom".to_string()).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.outcome, Outcome::Failed);
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(snapshot.warnings[0].fatal);
        assert_eq!(snapshot.status, "Failed: boom");
    }
}
