use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use super::context::TaskContext;
use super::state::{Outcome, TaskHandle, TaskSnapshot, TaskState, Warning};
use super::{Task, TaskKind};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Owns one cohort of concurrently running tasks.
///
/// Tasks can be registered at any time, including from inside a running task through its
/// [`TaskContext`]. The manager never cancels a task.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    name: String,
    run_id: Uuid,
    tasks: Mutex<Vec<TaskHandle>>,
    notifier: Arc<watch::Sender<u64>>,
    poll_interval: Duration,
}

impl TaskManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_poll_interval(name, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(name: impl Into<String>, poll_interval: Duration) -> Self {
        let (notifier, _) = watch::channel(0);
        Self {
            inner: Arc::new(ManagerInner {
                name: name.into(),
                run_id: Uuid::now_v7(),
                tasks: Mutex::new(Vec::new()),
                notifier: Arc::new(notifier),
                poll_interval,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and start a task on its own tokio task.
    pub fn start<T: Task>(&self, task: T) -> TaskHandle {
        self.start_boxed(Box::new(task))
    }

    pub fn start_boxed(&self, mut task: Box<dyn Task>) -> TaskHandle {
        let name = task.name();
        let kind = task.kind();
        let state = Arc::new(TaskState::new(
            name.clone(),
            kind,
            Arc::clone(&self.inner.notifier),
        ));
        let handle = TaskHandle::new(Arc::clone(&state), self.inner.poll_interval);
        self.tasks().push(handle.clone());

        let ctx = TaskContext::new(Arc::clone(&state), self.clone());
        let span = info_span!("task", name = %name, kind = %kind, run = %self.inner.run_id);
        debug!(task = %name, kind = %kind, "Starting task");

        tokio::spawn(async move {
            let body = tokio::spawn(async move { task.run(ctx).await }.instrument(span));
            let failure = match body.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(join_err) if join_err.is_panic() => {
                    Some(format!("Task panicked: {}", panic_message(join_err.into_panic())))
                }
                Err(join_err) => Some(join_err.to_string()),
            };
            settle(&state, kind, failure);
        });

        handle
    }

    /// Non-blocking: true iff every registered task is terminal.
    pub fn is_finished(&self) -> bool {
        self.tasks().iter().all(TaskHandle::is_terminal)
    }

    pub fn handles(&self) -> Vec<TaskHandle> {
        self.tasks().clone()
    }

    pub fn find(&self, name: &str) -> Option<TaskHandle> {
        self.tasks().iter().find(|h| h.name() == name).cloned()
    }

    /// Wait until every registered task, including ones registered while waiting, is terminal.
    pub async fn wait_until_finished(&self) {
        let mut changes = self.inner.notifier.subscribe();
        loop {
            if self.is_finished() {
                return;
            }
            let _ = tokio::time::timeout(self.inner.poll_interval, changes.changed()).await;
        }
    }

    pub fn summary(&self) -> CohortSummary {
        CohortSummary {
            name: self.inner.name.clone(),
            tasks: self.tasks().iter().map(TaskHandle::snapshot).collect(),
        }
    }
}

/// Apply the body's result to the task state.
fn settle(state: &TaskState, kind: TaskKind, failure: Option<String>) {
    let result = match failure {
        None if state.outcome().is_terminal() => Ok(()),
        // Auto-finish keeps the last status message.
        None => state.finish(None),
        Some(cause) => {
            error!(task = %state.name(), kind = %kind, %cause, "Task failed");
            state.fail(cause)
        }
    };
    if let Err(err) = result {
        warn!(task = %state.name(), error = %err, "Task returned an error after reaching a terminal state");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Per-task outcome of a completed cohort
#[derive(Debug, Clone)]
pub struct CohortSummary {
    pub name: String,
    pub tasks: Vec<TaskSnapshot>,
}

impl CohortSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.tasks.iter().filter(|t| t.outcome == outcome).count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.tasks.iter().flat_map(|t| t.warnings.iter())
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn task(&self, name: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
