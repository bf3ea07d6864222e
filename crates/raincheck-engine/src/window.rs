//! Concurrency-bounded ready window.
//!
//! Holds clients that have been promoted out of the admission queue and
//! are cleared to execute, up to the route's concurrency cap. Capacity is
//! a semaphore: the dispatcher blocks on a slot before promoting, and an
//! entry's permit rides inside the entry so removing it frees the slot.
//!
//! Every entry has a hard expiry. Claiming execution cancels the expiry
//! atomically with the READY to EXECUTING transition: both happen under
//! the entry map's mutex, and the expiry callback re-checks state and
//! generation before acting, so an expiry racing a claim is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use raincheck_core::ClientId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::AdmissionError;

/// Outcome of an execution claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginExecution {
    /// The caller owns the execution; the expiry timer is cancelled.
    Granted,
    /// A concurrent duplicate already owns the execution.
    AlreadyExecuting,
    /// No ready entry: it expired or never existed.
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyState {
    Ready,
    Executing,
}

#[derive(Debug)]
struct ReadyEntry {
    state: ReadyState,
    /// Distinguishes reinstalls of the same client so a stale expiry task
    /// cannot remove a newer entry.
    generation: u64,
    /// Held for the entry's lifetime; dropping it frees a capacity slot.
    _permit: OwnedSemaphorePermit,
}

/// Concurrency-bounded buffer of admitted-but-not-yet-executing clients.
#[derive(Debug)]
pub struct ReadyWindow {
    max_age: Duration,
    slots: Arc<Semaphore>,
    entries: Arc<Mutex<HashMap<ClientId, ReadyEntry>>>,
    generations: AtomicU64,
}

impl ReadyWindow {
    /// Create a window with `concurrency` slots and a per-entry expiry of
    /// `max_age`.
    #[must_use]
    pub fn new(concurrency: u32, max_age: Duration) -> Self {
        Self {
            max_age,
            slots: Arc::new(Semaphore::new(concurrency as usize)),
            entries: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Acquire a free capacity slot, waiting until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::WindowClosed`] if the window was shut
    /// down.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::WindowClosed)
    }

    /// Install a promoted client as READY, arming its expiry timer.
    ///
    /// The caller supplies the slot permit obtained from
    /// [`Self::acquire_slot`]; it is released when the entry is removed by
    /// expiry or completion.
    pub fn install(&self, client_id: ClientId, permit: OwnedSemaphorePermit) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self.entries.lock().insert(
            client_id.clone(),
            ReadyEntry {
                state: ReadyState::Ready,
                generation,
                _permit: permit,
            },
        );
        if previous.is_some() {
            // Controller invariant: a client is never promoted while it
            // already holds a ready entry.
            tracing::warn!(%client_id, "replaced existing ready entry on install");
        }

        let entries = Arc::clone(&self.entries);
        let max_age = self.max_age;
        tokio::spawn(async move {
            tokio::time::sleep(max_age).await;
            let mut entries = entries.lock();
            let still_ready = entries
                .get(&client_id)
                .is_some_and(|entry| entry.generation == generation && entry.state == ReadyState::Ready);
            if still_ready {
                entries.remove(&client_id);
                tracing::debug!(%client_id, "ready entry expired unclaimed");
            }
        });
    }

    /// Atomically claim execution for a ready client.
    ///
    /// At most one caller per installed entry observes
    /// [`BeginExecution::Granted`]; the transition cancels the pending
    /// expiry.
    pub fn try_begin_execution(&self, client_id: &ClientId) -> BeginExecution {
        let mut entries = self.entries.lock();
        match entries.get_mut(client_id) {
            None => BeginExecution::NotReady,
            Some(entry) if entry.state == ReadyState::Executing => BeginExecution::AlreadyExecuting,
            Some(entry) => {
                entry.state = ReadyState::Executing;
                BeginExecution::Granted
            }
        }
    }

    /// Remove the client's entry after execution, freeing its slot.
    ///
    /// Returns `true` if an entry was removed.
    pub fn complete(&self, client_id: &ClientId) -> bool {
        self.entries.lock().remove(client_id).is_some()
    }

    /// Whether the client currently holds a ready or executing entry.
    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.entries.lock().contains_key(client_id)
    }

    /// Number of live entries (ready plus executing).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the window holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close the window; pending and future slot acquisitions fail.
    pub fn close(&self) {
        self.slots.close();
    }
}
