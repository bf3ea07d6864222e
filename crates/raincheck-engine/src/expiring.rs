//! Generic set with per-entry TTL auto-eviction.
//!
//! Backs the "recently accepted" cool-down record. Repeated adds re-arm
//! the entry to the latest expiry; a removal task always re-checks the
//! stored deadline before deleting, so an older timer can never evict a
//! re-armed entry early.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct ExpiryState {
    deadline: Instant,
}

/// A set whose entries evict themselves after a TTL.
///
/// `add` must be called from within a tokio runtime: each add spawns a
/// removal task for the entry's deadline.
#[derive(Debug, Default, Clone)]
pub struct ExpiringSet {
    entries: Arc<Mutex<HashMap<String, ExpiryState>>>,
}

impl ExpiringSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key` with a time-to-live of `ttl`.
    ///
    /// If the key is already present, its deadline is extended to the
    /// later of the existing and the new expiry.
    pub fn add(&self, key: impl Into<String>, ttl: Duration) {
        let key = key.into();
        let deadline = Instant::now() + ttl;

        {
            let mut entries = self.entries.lock();
            let state = entries
                .entry(key.clone())
                .or_insert(ExpiryState { deadline });
            if deadline > state.deadline {
                state.deadline = deadline;
            }
        }

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut wake_at = deadline;
            loop {
                tokio::time::sleep_until(wake_at).await;
                let mut entries = entries.lock();
                match entries.get(&key).map(|state| state.deadline) {
                    Some(deadline) if deadline <= Instant::now() => {
                        entries.remove(&key);
                        tracing::trace!(%key, "expiring set entry evicted");
                        return;
                    }
                    // Re-armed while we slept; wait out the new deadline.
                    Some(deadline) => {
                        drop(entries);
                        wake_at = deadline;
                    }
                    None => return,
                }
            }
        });
    }

    /// Whether `key` is present (and not yet expired).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Remove `key` immediately.
    ///
    /// Returns `true` if the key was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
