//! Bounded min-priority-first admission queue.
//!
//! Holds one ticket per client, ordered by priority (original arrival
//! time) with insertion-order tie-breaking. On overflow the
//! maximum-priority ticket is evicted: the queue favors long-waiting
//! clients. Consumers that find the queue empty suspend until a ticket
//! arrives; there is no polling.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use raincheck_core::{ClientId, Priority};
use tokio::sync::Notify;

/// A queued admission claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub client_id: ClientId,
    pub priority: Priority,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Total order: priority first, then arrival sequence.
    ordered: BTreeMap<(Priority, u64), ClientId>,
    /// Reverse index for `contains` and idempotent enqueue.
    members: HashMap<ClientId, (Priority, u64)>,
    next_seq: u64,
}

/// Bounded priority ticket queue.
#[derive(Debug)]
pub struct AdmissionQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Notify,
}

impl AdmissionQueue {
    /// Create a queue bounded at `capacity` tickets.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
        }
    }

    /// Enqueue a client at the given priority.
    ///
    /// Idempotent per client: a client already queued keeps its existing
    /// ticket. If the insert pushes the queue over capacity, the
    /// maximum-priority ticket is evicted and returned (which may be the
    /// ticket just inserted).
    pub fn enqueue(&self, client_id: ClientId, priority: Priority) -> Option<Ticket> {
        let evicted = {
            let mut state = self.state.lock();
            if state.members.contains_key(&client_id) {
                return None;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.ordered.insert((priority, seq), client_id.clone());
            state.members.insert(client_id, (priority, seq));

            if state.ordered.len() > self.capacity {
                let (&key, _) = state
                    .ordered
                    .iter()
                    .next_back()
                    .expect("queue over capacity is non-empty");
                let evicted_client = state.ordered.remove(&key).expect("key just observed");
                state.members.remove(&evicted_client);
                Some(Ticket {
                    client_id: evicted_client,
                    priority: key.0,
                })
            } else {
                None
            }
        };

        if let Some(ticket) = &evicted {
            tracing::debug!(
                client_id = %ticket.client_id,
                priority = %ticket.priority,
                "queue overflow, evicted lowest-urgency ticket"
            );
        }

        self.not_empty.notify_one();
        evicted
    }

    /// Remove and return the minimum-priority ticket, suspending while the
    /// queue is empty.
    pub async fn pop_min(&self) -> Ticket {
        loop {
            // Arm the notification before checking so an enqueue between
            // the check and the await is not lost.
            let notified = self.not_empty.notified();
            if let Some(ticket) = self.try_pop_min() {
                return ticket;
            }
            notified.await;
        }
    }

    /// Remove and return the minimum-priority ticket if one exists.
    pub fn try_pop_min(&self) -> Option<Ticket> {
        let mut state = self.state.lock();
        let (&key, _) = state.ordered.iter().next()?;
        let client_id = state.ordered.remove(&key).expect("key just observed");
        state.members.remove(&client_id);
        Some(Ticket {
            client_id,
            priority: key.0,
        })
    }

    /// Remove a client's ticket if it holds one.
    ///
    /// Returns `true` if a ticket was removed.
    pub fn remove(&self, client_id: &ClientId) -> bool {
        let mut state = self.state.lock();
        match state.members.remove(client_id) {
            Some(key) => {
                state.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Whether the client currently holds a ticket.
    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.state.lock().members.contains_key(client_id)
    }

    /// Number of queued tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().ordered.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().ordered.is_empty()
    }
}
