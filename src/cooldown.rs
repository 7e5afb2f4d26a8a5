//! Cool-down bookkeeping shared by recurring checks
//!
//! `remaining = max(0, interval - (now - last_run))`. Local cool-downs (backup, recurring
//! scheduler) read the last run from the state store. The update-check protocol gets its
//! remaining time from the remote instead.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Store key of the recurring update cohort
pub const UPDATER_KEY: &str = "updater";
/// Store key of the backup task
pub const BACKUP_KEY: &str = "backup";

/// Longest single sleep while waiting for a cool-down to expire
const MAX_WAIT_STEP: Duration = Duration::from_secs(1);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(next) = chrono::Duration::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
        {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    interval: Duration,
    last_run: Option<DateTime<Utc>>,
}

impl Cooldown {
    pub fn new(interval: Duration, last_run: Option<DateTime<Utc>>) -> Self {
        Self { interval, last_run }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Time left until the next run is allowed. Never ran means no cool-down.
    ///
    /// A last run in the future (clock moved backwards) counts as having just run.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let Some(last_run) = self.last_run else {
            return Duration::ZERO;
        };
        let elapsed = (now - last_run).to_std().unwrap_or(Duration::ZERO);
        self.interval.saturating_sub(elapsed)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.remaining_at(now).is_zero()
    }
}

/// Sleep until the cool-down has expired according to `clock`.
///
/// Sleeps at most one second at a time and re-reads the clock, so wall-clock jumps and a
/// paused tokio clock are both honoured.
pub async fn wait_for_expiry(cooldown: &Cooldown, clock: &dyn Clock) {
    loop {
        let remaining = cooldown.remaining_at(clock.now());
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(MAX_WAIT_STEP)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_never_ran_has_no_cooldown() {
        let cooldown = Cooldown::new(Duration::from_secs(3600), None);
        assert_eq!(cooldown.remaining_at(t0()), Duration::ZERO);
        assert!(!cooldown.is_active_at(t0()));
    }

    #[test]
    fn test_gate_boundary() {
        let interval = Duration::from_secs(4 * 3600);
        let cooldown = Cooldown::new(interval, Some(t0()));

        let almost = t0() + chrono::Duration::from_std(interval).unwrap()
            - chrono::Duration::milliseconds(1);
        assert_eq!(cooldown.remaining_at(almost), Duration::from_millis(1));
        assert!(cooldown.is_active_at(almost));

        let exact = t0() + chrono::Duration::from_std(interval).unwrap();
        assert_eq!(cooldown.remaining_at(exact), Duration::ZERO);
        assert!(!cooldown.is_active_at(exact));
    }

    #[test]
    fn test_clock_moved_backwards() {
        let interval = Duration::from_secs(60);
        let cooldown = Cooldown::new(interval, Some(t0()));
        let before = t0() - chrono::Duration::seconds(30);
        assert_eq!(cooldown.remaining_at(before), interval);
    }

    /// Wall clock driven by the (pausable) tokio clock.
    struct TokioClock {
        base: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_expiry_with_paused_clock() {
        let clock = TokioClock {
            base: t0(),
            started: tokio::time::Instant::now(),
        };
        let cooldown = Cooldown::new(Duration::from_secs(90), Some(t0()));

        let started = tokio::time::Instant::now();
        wait_for_expiry(&cooldown, &clock).await;

        assert!(started.elapsed() >= Duration::from_secs(90));
        assert!(!cooldown.is_active_at(clock.now()));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), t0() + chrono::Duration::seconds(5));
        clock.set(t0());
        assert_eq!(clock.now(), t0());
    }
}
