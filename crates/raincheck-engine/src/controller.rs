//! The per-request admission decision protocol.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use raincheck_core::{
    AdmissionStatus, ClientId, Clock, IssuedToken, Priority, RaincheckConfig, RankEstimator,
    RetryAdvice, SignedToken, SystemClock, TokenSigner,
};
use tokio::task::JoinHandle;

use crate::{
    dispatcher, AdmissionError, AdmissionQueue, BeginExecution, BoxError, ExpiringSet, ReadyWindow,
};

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission<R> {
    /// The client was admitted; this is the wrapped handler's output,
    /// unmodified.
    Admitted(R),
    /// The client was not admitted; hand the advice (and any refreshed
    /// token inside it) back to the client.
    Deferred(RetryAdvice),
}

impl<R> Admission<R> {
    /// Whether the handler ran.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    /// The retry advice, if the request was deferred.
    #[must_use]
    pub fn into_deferred(self) -> Option<RetryAdvice> {
        match self {
            Self::Admitted(_) => None,
            Self::Deferred(advice) => Some(advice),
        }
    }
}

/// Orchestrates the admission queue, ready window, cool-down record, and
/// rank sketch into the per-request decision protocol.
///
/// One controller protects one route. Creating a controller spawns its
/// dispatcher task, so construction must happen inside a tokio runtime.
/// Dropping the controller aborts the dispatcher.
#[derive(Debug)]
pub struct AdmissionController {
    config: RaincheckConfig,
    signer: TokenSigner,
    sketch: RankEstimator,
    queue: Arc<AdmissionQueue>,
    window: Arc<ReadyWindow>,
    accepted: ExpiringSet,
    clock: Arc<dyn Clock>,
    /// Serializes the dispatcher's pop-to-install step against the
    /// controller's queue-membership checks.
    promotion_gate: Arc<Mutex<()>>,
    dispatcher: JoinHandle<()>,
    dispatcher_failed: Arc<AtomicBool>,
}

impl AdmissionController {
    /// Create a controller using the system wall clock.
    #[must_use]
    pub fn new(config: RaincheckConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a controller with an injected clock.
    #[must_use]
    pub fn with_clock(config: RaincheckConfig, clock: Arc<dyn Clock>) -> Self {
        let signer = TokenSigner::new(
            config.key().clone(),
            config.time_pause(),
            config.time_interval(),
        );
        let interval_ms = u64::try_from(config.max_age().as_millis()).unwrap_or(u64::MAX);
        let queue = Arc::new(AdmissionQueue::new(config.queue_size()));
        let window = Arc::new(ReadyWindow::new(config.concurrency(), config.max_age()));
        let promotion_gate = Arc::new(Mutex::new(()));
        let dispatcher_failed = Arc::new(AtomicBool::new(false));
        let dispatcher = dispatcher::spawn(
            Arc::clone(&queue),
            Arc::clone(&window),
            Arc::clone(&promotion_gate),
            Arc::clone(&dispatcher_failed),
        );

        Self {
            config,
            signer,
            sketch: RankEstimator::new(interval_ms),
            queue,
            window,
            accepted: ExpiringSet::new(),
            clock,
            promotion_gate,
            dispatcher,
            dispatcher_failed,
        }
    }

    /// The route configuration.
    #[must_use]
    pub const fn config(&self) -> &RaincheckConfig {
        &self.config
    }

    /// Whether the dispatcher is still promoting tickets.
    ///
    /// `false` means the controller is operationally dead and needs a
    /// restart.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.dispatcher_failed.load(Ordering::SeqCst) && !self.dispatcher.is_finished()
    }

    /// Shut the controller down: close the ready window and stop the
    /// dispatcher. The controller reports unhealthy afterwards.
    pub fn shutdown(&self) {
        self.window.close();
        // The dispatcher may be parked on an empty queue holding a slot
        // permit; it would only observe the closed window on its next
        // loop, so stop it directly.
        self.dispatcher.abort();
    }

    /// Run one request through the admission decision protocol.
    ///
    /// `remote_addr` is the caller's observed network identity;
    /// `override_id` is the load-testing identity override (ignored unless
    /// enabled in the config); `token` is the raw raincheck carried by the
    /// request, if any. `handler` is invoked only when the client's claim
    /// is granted.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::DispatcherStopped`] when the controller
    /// can no longer promote tickets, and [`AdmissionError::Handler`] when
    /// an admitted handler fails (admission cleanup has already run).
    pub async fn admit<F, Fut, R>(
        &self,
        remote_addr: &str,
        override_id: Option<&str>,
        token: Option<&str>,
        handler: F,
    ) -> Result<Admission<R>, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, BoxError>>,
    {
        if !self.is_healthy() {
            return Err(AdmissionError::DispatcherStopped);
        }

        let observed = self.config.resolve_client_id(remote_addr, override_id);
        let now_ms = self.clock.now_ms();

        let Some(raw) = token else {
            return Ok(Admission::Deferred(self.first_contact(&observed, now_ms)));
        };

        let parsed = match SignedToken::parse(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(client_id = %observed, %err, "rejected malformed token");
                return Ok(Admission::Deferred(self.invalid(err.to_string())));
            }
        };
        if let Err(err) = self.signer.validate(&parsed, &observed, now_ms) {
            tracing::debug!(client_id = %observed, %err, "rejected invalid token");
            return Ok(Admission::Deferred(self.invalid(err.to_string())));
        }

        let client_id = parsed.client_id().clone();
        let priority = parsed.priority();

        // State resolution order: ready, executing, accepted, queued,
        // nonexistent. `try_begin_execution` covers the first two and is
        // the only racy step; at most one concurrent caller is granted.
        match self.window.try_begin_execution(&client_id) {
            BeginExecution::Granted => self.execute(&client_id, handler).await,
            BeginExecution::AlreadyExecuting => {
                Ok(Admission::Deferred(self.processing(&client_id)))
            }
            BeginExecution::NotReady => {
                if self.accepted.contains(client_id.as_str()) {
                    return Ok(Admission::Deferred(self.already_accepted()));
                }
                Ok(Admission::Deferred(self.queue_or_requeue(
                    &client_id, priority, now_ms,
                )))
            }
        }
    }

    /// Invoke the handler for a granted claim with always-run release:
    /// the ready entry is removed and the cool-down recorded no matter how
    /// the handler fares.
    async fn execute<F, Fut, R>(
        &self,
        client_id: &ClientId,
        handler: F,
    ) -> Result<Admission<R>, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, BoxError>>,
    {
        tracing::info!(%client_id, route = %self.config.route(), "admitted");

        // The release must run however the handler exits, including a
        // panic unwinding through the await; otherwise the client is stuck
        // in EXECUTING holding a capacity slot forever.
        let release = ReleaseOnDrop {
            controller: self,
            client_id,
        };
        let outcome = handler().await;
        drop(release);

        match outcome {
            Ok(response) => Ok(Admission::Admitted(response)),
            Err(source) => {
                tracing::warn!(%client_id, error = %source, "admitted handler failed");
                Err(AdmissionError::Handler { source })
            }
        }
    }

    fn first_contact(&self, client_id: &ClientId, now_ms: u64) -> RetryAdvice {
        tracing::debug!(%client_id, "first contact, issuing raincheck");
        RetryAdvice {
            status: AdmissionStatus::FirstContact,
            detail: "Get the raincheck".to_owned(),
            rank: self.sketch.rank(Priority::MAX, now_ms),
            retry_after_ms: self.retry_after_ms(),
            token: Some(self.issue(client_id, now_ms, None)),
        }
    }

    fn invalid(&self, detail: String) -> RetryAdvice {
        RetryAdvice {
            status: AdmissionStatus::InvalidToken,
            detail,
            rank: None,
            retry_after_ms: self.retry_after_ms(),
            token: None,
        }
    }

    fn processing(&self, client_id: &ClientId) -> RetryAdvice {
        tracing::debug!(%client_id, "duplicate request while executing");
        RetryAdvice {
            status: AdmissionStatus::Processing,
            detail: "Request is already being processed".to_owned(),
            rank: None,
            retry_after_ms: self.retry_after_ms(),
            token: None,
        }
    }

    fn already_accepted(&self) -> RetryAdvice {
        RetryAdvice {
            status: AdmissionStatus::AlreadyAccepted,
            detail: "Request is in Accepted".to_owned(),
            rank: None,
            retry_after_ms: self.retry_after_ms(),
            token: None,
        }
    }

    /// Handle the `queued` and `nonexistent` rows of the decision table:
    /// renew the token at the original priority and, if the client lost
    /// its ticket (expiry or overflow eviction), re-enter the queue.
    fn queue_or_requeue(
        &self,
        client_id: &ClientId,
        priority: Priority,
        now_ms: u64,
    ) -> RetryAdvice {
        self.sketch.observe(client_id, priority, now_ms);

        let detail = {
            // Under the promotion gate so the membership check cannot
            // interleave with the dispatcher's install. A retry landing
            // between a pop and the install still sees the client in
            // neither structure; the duplicate ticket it enqueues is
            // stripped by the install itself.
            let _gate = self.promotion_gate.lock();
            if self.queue.contains(client_id) || self.window.contains(client_id) {
                "Waiting in the admission queue"
            } else {
                if let Some(evicted) = self.queue.enqueue(client_id.clone(), priority) {
                    tracing::debug!(
                        evicted = %evicted.client_id,
                        "admission queue overflow while enqueuing"
                    );
                }
                "Joined the admission queue"
            }
        };

        RetryAdvice {
            status: AdmissionStatus::Queued,
            detail: detail.to_owned(),
            rank: self.sketch.rank(priority, now_ms),
            retry_after_ms: self.retry_after_ms(),
            token: Some(self.issue(client_id, now_ms, Some(priority))),
        }
    }

    fn issue(&self, client_id: &ClientId, now_ms: u64, priority: Option<Priority>) -> IssuedToken {
        IssuedToken {
            key: self.config.token_key(),
            value: self.signer.issue(client_id, now_ms, priority),
            max_age_ms: u64::try_from(self.config.max_age().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.config.time_pause().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Removes the ready entry and records the cool-down on drop, so admitted
/// execution cleanup also runs when the handler panics.
struct ReleaseOnDrop<'a> {
    controller: &'a AdmissionController,
    client_id: &'a ClientId,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.controller.window.complete(self.client_id);
        self.controller
            .accepted
            .add(self.client_id.as_str(), self.controller.config.max_age());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raincheck_core::MacKey;
    use std::time::Duration;

    fn config() -> RaincheckConfig {
        RaincheckConfig::new(
            "/rc_prime",
            3,
            Duration::from_secs(1),
            Duration::from_secs(10),
            1,
            MacKey::from_bytes(b"this is secret key".to_vec()).unwrap(),
        )
        .unwrap()
    }

    async fn noop() -> Result<&'static str, BoxError> {
        Ok("served")
    }

    #[tokio::test(start_paused = true)]
    async fn first_contact_issues_a_token_with_a_pause_hint() {
        let controller = AdmissionController::new(config());

        let advice = controller
            .admit("203.0.113.4", None, None, noop)
            .await
            .unwrap()
            .into_deferred()
            .unwrap();

        assert_eq!(advice.status, AdmissionStatus::FirstContact);
        assert_eq!(advice.retry_after_ms, 1_000);
        let token = advice.token.unwrap();
        assert_eq!(token.key, "raincheck#/rc_prime");
        assert_eq!(token.max_age_ms, 11_000);
        assert!(SignedToken::parse(&token.value).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_token_is_rejected_without_reissue() {
        let controller = AdmissionController::new(config());

        let advice = controller
            .admit("203.0.113.4", None, Some("not#a#token"), noop)
            .await
            .unwrap()
            .into_deferred()
            .unwrap();

        assert_eq!(advice.status, AdmissionStatus::InvalidToken);
        assert_eq!(advice.detail, "raincheck format error");
        assert!(advice.token.is_none());
        assert!(advice.rank.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_address_is_named_in_the_rejection() {
        let controller = AdmissionController::new(config());

        let issued = controller
            .admit("203.0.113.4", None, None, noop)
            .await
            .unwrap()
            .into_deferred()
            .unwrap()
            .token
            .unwrap();

        // Replay the stolen token from a different address inside the
        // claim window.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let advice = controller
            .admit("203.0.113.99", None, Some(&issued.value), noop)
            .await
            .unwrap()
            .into_deferred()
            .unwrap();

        assert_eq!(advice.status, AdmissionStatus::InvalidToken);
        assert_eq!(advice.detail, "Client ID mismatch");
        assert!(advice.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_racing_a_promotion_is_not_double_tracked() {
        let controller = AdmissionController::new(config());
        // Stop the background dispatcher and drive the promotion by hand
        // so a retry can land between the pop and the install.
        controller.dispatcher.abort();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let client = ClientId::new("203.0.113.4");
        let priority = Priority::from_unix_ms(1_000);
        controller.queue.enqueue(client.clone(), priority);
        let permit = controller.window.acquire_slot().await.unwrap();
        let ticket = controller.queue.try_pop_min().unwrap();

        // The racing retry sees the client in neither the queue nor the
        // window and re-enqueues it.
        let advice = controller.queue_or_requeue(&client, priority, 2_000);
        assert_eq!(advice.detail, "Joined the admission queue");

        dispatcher::promote(
            &controller.queue,
            &controller.window,
            &controller.promotion_gate,
            ticket,
            permit,
        );

        // The install strips the duplicate ticket: the ready entry is the
        // only tracking.
        assert!(controller.window.contains(&client));
        assert!(!controller.queue.contains(&client));

        // After the client is served nothing is left to promote it into a
        // second execution.
        assert_eq!(
            controller.window.try_begin_execution(&client),
            BeginExecution::Granted
        );
        controller.window.complete(&client);
        assert!(controller.queue.is_empty());
        assert_eq!(
            controller.window.try_begin_execution(&client),
            BeginExecution::NotReady
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_an_install_does_not_re_enqueue_a_ready_client() {
        let controller = AdmissionController::new(config());
        controller.dispatcher.abort();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let client = ClientId::new("203.0.113.4");
        let priority = Priority::from_unix_ms(1_000);
        controller.queue.enqueue(client.clone(), priority);
        let permit = controller.window.acquire_slot().await.unwrap();
        let ticket = controller.queue.try_pop_min().unwrap();
        dispatcher::promote(
            &controller.queue,
            &controller.window,
            &controller.promotion_gate,
            ticket,
            permit,
        );

        // The client already holds a ready entry; the retry must not give
        // it a second ticket.
        let advice = controller.queue_or_requeue(&client, priority, 2_000);
        assert_eq!(advice.detail, "Waiting in the admission queue");
        assert!(!controller.queue.contains(&client));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_makes_the_controller_unhealthy() {
        let controller = AdmissionController::new(config());
        assert!(controller.is_healthy());

        controller.shutdown();
        // Let the dispatcher observe the closed window.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!controller.is_healthy());

        let err = controller
            .admit("203.0.113.4", None, None, noop)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::DispatcherStopped));
    }
}
