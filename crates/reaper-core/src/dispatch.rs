use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::JobId;

/// Default suppression window, in seconds, between two dispatches of a job.
pub const DEFAULT_DISPATCH_WINDOW_SECS: i64 = 60;

/// Suppresses duplicate dispatches of a job inside a minimum interval.
///
/// Remembers, per job, the last time it was dispatched by this process and
/// combines that with the last run the configuration store knows about.
/// Check and record happen under one lock, so two overlapping ticks cannot
/// both dispatch the same job. This is not a distributed lock: it assumes a
/// single scheduler process.
#[derive(Debug, Clone)]
pub struct DispatchGuard {
    window: TimeDelta,
    last_dispatch: Arc<Mutex<HashMap<JobId, DateTime<Utc>>>>,
}

impl Default for DispatchGuard {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_DISPATCH_WINDOW_SECS))
    }
}

impl DispatchGuard {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            last_dispatch: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    fn lock_inner(&self) -> MutexGuard<'_, HashMap<JobId, DateTime<Utc>>> {
        self.last_dispatch.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned dispatch guard mutex");
            poisoned.into_inner()
        })
    }

    /// Decide whether `job_id` may run at `now`, recording the dispatch if so.
    ///
    /// Returns false when the most recent of `last_known_run` and this guard's
    /// own record is less than the window before `now`.
    pub fn should_dispatch(
        &self,
        job_id: JobId,
        last_known_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut last_dispatch = self.lock_inner();

        let last = match (last_known_run, last_dispatch.get(&job_id).copied()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(last) = last
            && now - last < self.window
        {
            return false;
        }

        last_dispatch.insert(job_id, now);
        true
    }

    /// Last dispatch recorded by this guard.
    pub fn last_dispatch(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.lock_inner().get(&job_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_run_is_suppressed() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        assert!(!guard.should_dispatch(1, Some(now - TimeDelta::seconds(30)), now));
        assert_eq!(guard.last_dispatch(1), None);
    }

    #[test]
    fn old_run_is_dispatched() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        assert!(guard.should_dispatch(1, Some(now - TimeDelta::seconds(90)), now));
        assert_eq!(guard.last_dispatch(1), Some(now));
    }

    #[test]
    fn no_prior_run_is_dispatched() {
        let guard = DispatchGuard::default();
        assert!(guard.should_dispatch(1, None, Utc::now()));
    }

    #[test]
    fn exactly_one_window_ago_is_dispatched() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        assert!(guard.should_dispatch(1, Some(now - TimeDelta::seconds(60)), now));
    }

    #[test]
    fn own_record_suppresses_second_dispatch() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        assert!(guard.should_dispatch(1, None, now));
        // The store has not seen the run yet, the guard has.
        assert!(!guard.should_dispatch(1, None, now + TimeDelta::seconds(20)));
        assert!(guard.should_dispatch(1, None, now + TimeDelta::seconds(61)));
    }

    #[test]
    fn jobs_are_tracked_independently() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        assert!(guard.should_dispatch(1, None, now));
        assert!(guard.should_dispatch(2, None, now));
    }

    #[test]
    fn concurrent_ticks_dispatch_once() {
        let guard = DispatchGuard::default();
        let now = Utc::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let g = guard.clone();
                std::thread::spawn(move || g.should_dispatch(42, None, now))
            })
            .collect();
        let dispatched = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| *d)
            .count();
        assert_eq!(dispatched, 1);
    }
}
