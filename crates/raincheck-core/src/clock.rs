//! Wall-clock abstraction.
//!
//! Token lifetime windows are checked against wall-clock time, which tests
//! need to control independently of the tokio timer wheel. Production code
//! uses [`SystemClock`]; tests inject a manual clock from
//! `raincheck-testkit`.

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}
