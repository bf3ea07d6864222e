//! Error types for token validation and configuration.

use thiserror::Error;

/// Token validation failures.
///
/// All of these are non-fatal: the controller answers with a rejection
/// response naming the failed check in the response detail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Wrong field count or a non-numeric timestamp field.
    #[error("raincheck format error")]
    Format,

    /// Recomputed HMAC does not match the token's MAC.
    #[error("MAC verification fail")]
    MacMismatch,

    /// The caller's observed identity differs from the token's bound id.
    #[error("Client ID mismatch")]
    ClientIdMismatch,

    /// Current time is outside `[window_start, window_end]`.
    #[error("Not in the lifetime")]
    NotInLifetime,
}

/// Per-route configuration errors, rejected at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue_size must be > 0")]
    ZeroQueueSize,

    #[error("concurrency must be > 0")]
    ZeroConcurrency,

    #[error("time_interval must be > 0")]
    ZeroTimeInterval,

    #[error("HMAC key must not be empty")]
    EmptyKey,

    #[error("invalid hex-encoded key: {0}")]
    BadHexKey(String),
}
