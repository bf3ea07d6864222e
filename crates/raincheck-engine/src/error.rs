//! Engine error types.

use thiserror::Error;

/// Boxed error produced by a wrapped handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures surfaced by the admission engine.
///
/// Token problems are not errors at this level; they produce rejection
/// responses. These variants are for configuration mistakes, handler
/// failures during admitted execution, and the one fatal condition: a
/// stopped dispatcher.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Invalid per-route configuration.
    #[error(transparent)]
    Config(#[from] raincheck_core::ConfigError),

    /// The ready window was closed; no more slots can be acquired.
    #[error("ready window closed")]
    WindowClosed,

    /// The dispatcher task stopped; the controller can no longer promote
    /// tickets and must be treated as needing a restart.
    #[error("admission dispatcher stopped; controller needs restart")]
    DispatcherStopped,

    /// The wrapped handler failed during admitted execution. Admission
    /// cleanup (slot release, cool-down record) has already run.
    #[error("admitted handler failed: {source}")]
    Handler {
        #[source]
        source: BoxError,
    },
}
