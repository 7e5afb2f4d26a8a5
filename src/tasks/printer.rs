use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::manager::{CohortSummary, TaskManager};
use super::state::Outcome;

/// Log the status of every running task on a fixed interval until the cohort is done.
pub fn spawn_progress_printer(manager: TaskManager, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if manager.is_finished() {
                break;
            }
            for handle in manager.handles() {
                let snapshot = handle.snapshot();
                if snapshot.outcome.is_terminal() {
                    continue;
                }
                match snapshot.percent() {
                    Some(percent) => info!(
                        cohort = manager.name(),
                        task = %snapshot.name,
                        percent,
                        "{}", snapshot.status
                    ),
                    None => info!(cohort = manager.name(), task = %snapshot.name, "{}", snapshot.status),
                }
            }
        }
    })
}

/// Log the final summary of a cohort: one line per task plus every warning.
pub fn log_summary(summary: &CohortSummary) {
    for task in &summary.tasks {
        info!(
            cohort = %summary.name,
            task = %task.name,
            outcome = %task.outcome,
            "{}", task.status
        );
    }
    for warning in summary.warnings() {
        if warning.fatal {
            warn!(cohort = %summary.name, fatal = true, "{}", warning);
        } else {
            warn!(cohort = %summary.name, "{}", warning);
        }
    }
    info!(
        cohort = %summary.name,
        tasks = summary.tasks.len(),
        finished = summary.count(Outcome::Finished) + summary.count(Outcome::FinishedWithWarnings),
        skipped = summary.count(Outcome::Skipped),
        failed = summary.count(Outcome::Failed),
        warnings = summary.warning_count(),
        "Cohort completed"
    );
}
