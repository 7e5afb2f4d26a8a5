//! Tracing setup and agent counters

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

use crate::tasks::{CohortSummary, Outcome};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is harmless.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Metrics handle for recording agent counters
#[derive(Debug, Default)]
pub struct Metrics {
    cycles_run: AtomicU64,
    updates_found: AtomicU64,
    tasks_failed: AtomicU64,
    warnings_recorded: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_run(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "cycles_run", "Metric incremented");
    }

    pub fn updates_found(&self, count: u64) {
        self.updates_found.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "updates_found", count, "Metric incremented");
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn warnings_recorded(&self, count: u64) {
        self.warnings_recorded.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "warnings_recorded", count, "Metric incremented");
    }

    /// Fold a finished cohort into the counters and log the resulting snapshot.
    pub fn record_cohort(&self, summary: &CohortSummary) {
        self.cycle_run();
        for task in &summary.tasks {
            if task.outcome == Outcome::Failed {
                self.task_failed();
            }
        }
        let warnings = summary.warning_count() as u64;
        if warnings > 0 {
            self.warnings_recorded(warnings);
        }

        let snapshot = self.snapshot();
        tracing::info!(
            cohort = %summary.name,
            cycles_run = snapshot.cycles_run,
            updates_found = snapshot.updates_found,
            tasks_failed = snapshot.tasks_failed,
            warnings_recorded = snapshot.warnings_recorded,
            "Metrics snapshot"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            updates_found: self.updates_found.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            warnings_recorded: self.warnings_recorded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub updates_found: u64,
    pub tasks_failed: u64,
    pub warnings_recorded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskKind, TaskSnapshot, Warning};

    fn snapshot(name: &str, outcome: Outcome, warnings: usize) -> TaskSnapshot {
        TaskSnapshot {
            name: name.to_string(),
            kind: TaskKind::Backup,
            status: String::new(),
            current: 0,
            max: None,
            warnings: (0..warnings).map(|i| Warning::new(name, format!("w{}", i))).collect(),
            outcome,
        }
    }

    #[test]
    fn test_record_cohort() {
        let metrics = Metrics::new();
        let summary = CohortSummary {
            name: "updater".to_string(),
            tasks: vec![
                snapshot("a", Outcome::Finished, 0),
                snapshot("b", Outcome::Failed, 1),
                snapshot("c", Outcome::FinishedWithWarnings, 2),
            ],
        };

        metrics.record_cohort(&summary);
        metrics.updates_found(3);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                cycles_run: 1,
                updates_found: 3,
                tasks_failed: 1,
                warnings_recorded: 3,
            }
        );
    }
}
