//! Background promotion loop.
//!
//! One perpetual task per controller: wait for a free ready-window slot,
//! wait for the highest-priority queued ticket, promote it. Any failure is
//! fatal to the controller instance; the loop records it and exits, and
//! the controller reports itself unhealthy. There is no self-restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;

use crate::{AdmissionQueue, ReadyWindow, Ticket};

pub(crate) fn spawn(
    queue: Arc<AdmissionQueue>,
    window: Arc<ReadyWindow>,
    gate: Arc<Mutex<()>>,
    failed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("admission dispatcher started");
        loop {
            let permit = match window.acquire_slot().await {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::error!(%err, "admission dispatcher stopped");
                    failed.store(true, Ordering::SeqCst);
                    return;
                }
            };

            let ticket = queue.pop_min().await;
            promote(&queue, &window, &gate, ticket, permit);
        }
    })
}

/// Install a popped ticket as READY under the promotion gate.
///
/// A retry landing between the pop and this call observes the client in
/// neither the queue nor the window and re-enqueues it; that duplicate
/// ticket is stripped here so the ready entry is the client's only
/// tracking.
pub(crate) fn promote(
    queue: &AdmissionQueue,
    window: &ReadyWindow,
    gate: &Mutex<()>,
    ticket: Ticket,
    permit: OwnedSemaphorePermit,
) {
    let _gate = gate.lock();
    if queue.remove(&ticket.client_id) {
        tracing::debug!(
            client_id = %ticket.client_id,
            "stripped duplicate ticket enqueued during promotion"
        );
    }
    tracing::debug!(
        client_id = %ticket.client_id,
        priority = %ticket.priority,
        "promoting ticket into ready window"
    );
    window.install(ticket.client_id, permit);
}
