//! Manually-driven wall clock for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raincheck_core::Clock;

/// A [`Clock`] that only moves when the test says so.
///
/// Pairs with tokio's paused time: advance both in lockstep to walk a
/// scenario through token windows and expiry timers deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ms` milliseconds.
    #[must_use]
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicU64::new(start_ms),
        })
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(by, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    ///
    /// # Panics
    ///
    /// Panics if `at_ms` would move the clock backwards.
    pub fn set(&self, at_ms: u64) {
        let current = self.now_ms.swap(at_ms, Ordering::SeqCst);
        assert!(current <= at_ms, "manual clock must not move backwards");
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
