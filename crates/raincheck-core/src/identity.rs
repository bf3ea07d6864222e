//! Client identity and priority primitives.

use serde::{Deserialize, Serialize};

/// Opaque client identifier.
///
/// Usually derived from the remote network address, but any stable string
/// works (e.g. a session username). This is the trust-boundary anchor: all
/// per-client admission state is keyed by it. The token codec escapes its
/// field separator, so the id may contain any characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Admission priority: the client's original arrival time in milliseconds
/// since the Unix epoch. Smaller means earlier, and earlier is served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Priority(u64);

impl Priority {
    /// The lowest-urgency priority; used as the worst-case rank probe for
    /// clients that have not been seen before.
    pub const MAX: Self = Self(u64::MAX);

    /// Create a priority from a Unix-epoch millisecond timestamp.
    #[must_use]
    pub const fn from_unix_ms(ms: u64) -> Self {
        Self(ms)
    }

    /// The underlying millisecond timestamp.
    #[must_use]
    pub const fn as_unix_ms(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
