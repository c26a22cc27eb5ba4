use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Milliseconds elapsed on a clock started once and never reset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MonotonicClock {
    started_at: Instant,
}

impl MonotonicClock {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub(crate) fn elapsed_ms(&self) -> i64 {
        duration_millis_to_i64_saturating(self.started_at.elapsed())
    }
}

/// Wait needed from `now_ms` until `due_ms`; zero once the deadline passed.
pub(crate) fn wait_until(due_ms: i64, now_ms: i64) -> Duration {
    let remaining = due_ms.saturating_sub(now_ms).max(0);
    Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
}

fn duration_millis_to_i64_saturating(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
