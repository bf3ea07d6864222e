//! Per-route configuration for an admission controller.

use std::time::Duration;

use crate::{ClientId, ConfigError};

/// HMAC key size used by [`MacKey::generate`].
pub const MAC_KEY_SIZE: usize = 32;

/// Process-wide HMAC secret with redacted debug output.
#[derive(Clone)]
pub struct MacKey {
    bytes: Vec<u8>,
}

impl MacKey {
    /// Create from raw key material.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        Ok(Self { bytes })
    }

    /// Create from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or decodes to an
    /// empty key.
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigError> {
        let bytes = hex::decode(hex_key).map_err(|e| ConfigError::BadHexKey(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Generate a random key.
    ///
    /// Tokens signed with a generated key do not survive a process restart
    /// and cannot be validated by sibling processes; share a configured key
    /// for anything beyond a single-process deployment.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MAC_KEY_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        Self { bytes }
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Configuration for one protected route.
#[derive(Debug, Clone)]
pub struct RaincheckConfig {
    route: String,
    queue_size: usize,
    time_pause: Duration,
    time_interval: Duration,
    concurrency: u32,
    key: MacKey,
    allow_identity_override: bool,
}

impl RaincheckConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `queue_size` or `concurrency` is zero, or if
    /// `time_interval` is zero (tokens would never be claimable).
    pub fn new(
        route: impl Into<String>,
        queue_size: usize,
        time_pause: Duration,
        time_interval: Duration,
        concurrency: u32,
        key: MacKey,
    ) -> Result<Self, ConfigError> {
        if queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if time_interval.is_zero() {
            return Err(ConfigError::ZeroTimeInterval);
        }
        Ok(Self {
            route: route.into(),
            queue_size,
            time_pause,
            time_interval,
            concurrency,
            key,
            allow_identity_override: false,
        })
    }

    /// Honor caller-supplied identity overrides.
    ///
    /// This is a load-testing hook with no production safeguard; it lets any
    /// caller impersonate any client. Off by default, and it must stay that
    /// way outside test rigs.
    #[must_use]
    pub const fn with_identity_override(mut self, allow: bool) -> Self {
        self.allow_identity_override = allow;
        self
    }

    /// Route this configuration protects.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Admission queue bound.
    #[must_use]
    pub const fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Minimum retry delay before a token becomes claimable.
    #[must_use]
    pub const fn time_pause(&self) -> Duration {
        self.time_pause
    }

    /// Length of the token validity window.
    #[must_use]
    pub const fn time_interval(&self) -> Duration {
        self.time_interval
    }

    /// Ready-window / simultaneous-execution cap.
    #[must_use]
    pub const fn concurrency(&self) -> u32 {
        self.concurrency
    }

    /// The HMAC secret.
    #[must_use]
    pub const fn key(&self) -> &MacKey {
        &self.key
    }

    /// Whether caller-supplied identity overrides are honored.
    #[must_use]
    pub const fn allow_identity_override(&self) -> bool {
        self.allow_identity_override
    }

    /// Cookie TTL and the ready/accepted TTL: `time_pause + time_interval`.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.time_pause + self.time_interval
    }

    /// Transport key under which the token travels, derived from the route
    /// so every protected route carries an independent token.
    #[must_use]
    pub fn token_key(&self) -> String {
        format!("raincheck#{}", self.route)
    }

    /// Resolve the effective client identity for a request.
    ///
    /// The override is honored only when [`Self::with_identity_override`]
    /// enabled it; otherwise the remote address wins and the attempt is
    /// logged.
    #[must_use]
    pub fn resolve_client_id(&self, remote_addr: &str, override_id: Option<&str>) -> ClientId {
        match override_id {
            Some(id) if self.allow_identity_override => ClientId::new(id),
            Some(_) => {
                tracing::debug!(
                    route = %self.route,
                    %remote_addr,
                    "ignoring client identity override outside test mode"
                );
                ClientId::new(remote_addr)
            }
            None => ClientId::new(remote_addr),
        }
    }
}
