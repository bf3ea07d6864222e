//! The signed retry-token ("raincheck") protocol.
//!
//! A token is five `#`-joined fields:
//! `client_id#priority#window_start#window_end#mac`, where the MAC is the
//! base64-encoded HMAC-SHA256 of the first four fields exactly as they
//! appear on the wire. The client id field is percent-escaped (`%` and the
//! `#` separator) so any identity survives the framing. Tokens are
//! self-contained: the server stores nothing matching them, and validity
//! depends only on the key and the wall clock.
//!
//! Timestamps are decimal milliseconds since the Unix epoch.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{ClientId, MacKey, Priority, TokenError};

/// Number of `#`-separated fields in a well-formed token.
pub const TOKEN_FIELDS: usize = 5;

const SEPARATOR: char = '#';

/// A parsed (but not yet validated) raincheck token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    client_id: ClientId,
    priority: Priority,
    window_start_ms: u64,
    window_end_ms: u64,
    /// The raw signed portion, kept byte-for-byte so MAC verification runs
    /// over what the client actually presented.
    message: String,
    mac: String,
}

impl SignedToken {
    /// Parse a raw token string.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Format`] on a wrong field count or a
    /// non-numeric timestamp field.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let fields: Vec<&str> = raw.split(SEPARATOR).collect();
        if fields.len() != TOKEN_FIELDS {
            return Err(TokenError::Format);
        }

        let priority_ms: u64 = fields[1].parse().map_err(|_| TokenError::Format)?;
        let window_start_ms: u64 = fields[2].parse().map_err(|_| TokenError::Format)?;
        let window_end_ms: u64 = fields[3].parse().map_err(|_| TokenError::Format)?;

        let (message, mac) = raw.rsplit_once(SEPARATOR).ok_or(TokenError::Format)?;

        Ok(Self {
            client_id: ClientId::new(unescape_id(fields[0])),
            priority: Priority::from_unix_ms(priority_ms),
            window_start_ms,
            window_end_ms,
            message: message.to_owned(),
            mac: mac.to_owned(),
        })
    }

    /// Identity the token is bound to.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The priority (original arrival time) carried by the token.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Start of the claim window, Unix-epoch milliseconds.
    #[must_use]
    pub const fn window_start_ms(&self) -> u64 {
        self.window_start_ms
    }

    /// End of the claim window, Unix-epoch milliseconds (inclusive).
    #[must_use]
    pub const fn window_end_ms(&self) -> u64 {
        self.window_end_ms
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn mac(&self) -> &str {
        &self.mac
    }
}

/// Issues and validates rainchecks for one route.
#[derive(Debug, Clone)]
pub struct TokenSigner {
    key: MacKey,
    time_pause: Duration,
    time_interval: Duration,
}

impl TokenSigner {
    /// Create a signer with the route's pause and validity interval.
    #[must_use]
    pub const fn new(key: MacKey, time_pause: Duration, time_interval: Duration) -> Self {
        Self {
            key,
            time_pause,
            time_interval,
        }
    }

    /// Issue a token for `client_id` at wall-clock time `now_ms`.
    ///
    /// The claim window is `[now + time_pause, now + time_pause +
    /// time_interval]`. A renewal passes the client's original arrival time
    /// as `priority`; a first issue leaves it `None` and the token carries
    /// `now_ms` as its priority.
    #[must_use]
    pub fn issue(&self, client_id: &ClientId, now_ms: u64, priority: Option<Priority>) -> String {
        let window_start = now_ms.saturating_add(duration_ms(self.time_pause));
        let window_end = window_start.saturating_add(duration_ms(self.time_interval));
        let ts = priority.map_or(now_ms, Priority::as_unix_ms);

        let id = escape_id(client_id.as_str());
        let message = format!("{id}#{ts}#{window_start}#{window_end}");
        let mac = self.mac_base64(message.as_bytes());
        format!("{message}#{mac}")
    }

    /// Validate a parsed token against the observed caller identity and the
    /// current wall-clock time.
    ///
    /// Checks run in the same order as the rejection messages clients see:
    /// MAC, then identity binding, then lifetime window (both bounds
    /// inclusive).
    ///
    /// # Errors
    ///
    /// Returns the specific [`TokenError`] naming the failed check.
    pub fn validate(
        &self,
        token: &SignedToken,
        observed: &ClientId,
        now_ms: u64,
    ) -> Result<(), TokenError> {
        let expected = self.mac_base64(token.message().as_bytes());
        if expected.as_bytes().ct_eq(token.mac().as_bytes()).unwrap_u8() == 0 {
            return Err(TokenError::MacMismatch);
        }
        if token.client_id() != observed {
            return Err(TokenError::ClientIdMismatch);
        }
        if now_ms < token.window_start_ms() || now_ms > token.window_end_ms() {
            return Err(TokenError::NotInLifetime);
        }
        Ok(())
    }

    /// Cookie TTL matching the claim window: `time_pause + time_interval`.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.time_pause + self.time_interval
    }

    fn mac_base64(&self, message: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message);
        BASE64.encode(mac.finalize().into_bytes())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// The id field must not contain the separator; `%` is escaped first so the
// escape sequences themselves stay unambiguous.
fn escape_id(id: &str) -> String {
    id.replace('%', "%25").replace(SEPARATOR, "%23")
}

fn unescape_id(field: &str) -> String {
    field.replace("%23", "#").replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(
            MacKey::from_bytes(b"this is secret key".to_vec()).unwrap(),
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn round_trip_validates_inside_window() {
        let signer = signer();
        let client = ClientId::new("203.0.113.4");
        let raw = signer.issue(&client, 5_000, None);

        let token = SignedToken::parse(&raw).unwrap();
        assert_eq!(token.client_id(), &client);
        assert_eq!(token.priority(), Priority::from_unix_ms(5_000));
        assert_eq!(token.window_start_ms(), 6_000);
        assert_eq!(token.window_end_ms(), 16_000);

        // Both window bounds are inclusive.
        assert_eq!(signer.validate(&token, &client, 6_000), Ok(()));
        assert_eq!(signer.validate(&token, &client, 11_000), Ok(()));
        assert_eq!(signer.validate(&token, &client, 16_000), Ok(()));

        assert_eq!(
            signer.validate(&token, &client, 5_999),
            Err(TokenError::NotInLifetime)
        );
        assert_eq!(
            signer.validate(&token, &client, 16_001),
            Err(TokenError::NotInLifetime)
        );
    }

    #[test]
    fn renewal_carries_original_priority() {
        let signer = signer();
        let client = ClientId::new("203.0.113.4");
        let raw = signer.issue(&client, 9_000, Some(Priority::from_unix_ms(5_000)));

        let token = SignedToken::parse(&raw).unwrap();
        assert_eq!(token.priority(), Priority::from_unix_ms(5_000));
        assert_eq!(token.window_start_ms(), 10_000);
        assert_eq!(token.window_end_ms(), 20_000);
        assert_eq!(signer.validate(&token, &client, 10_000), Ok(()));
    }

    #[test]
    fn reissue_at_different_times_yields_different_macs_that_both_validate() {
        let signer = signer();
        let client = ClientId::new("203.0.113.4");
        let priority = Some(Priority::from_unix_ms(5_000));

        let first = signer.issue(&client, 6_000, priority);
        let second = signer.issue(&client, 7_000, priority);
        assert_ne!(first, second);

        let first = SignedToken::parse(&first).unwrap();
        let second = SignedToken::parse(&second).unwrap();
        assert_ne!(first.mac(), second.mac());

        // 8_000 lies inside both claim windows.
        assert_eq!(signer.validate(&first, &client, 8_000), Ok(()));
        assert_eq!(signer.validate(&second, &client, 8_000), Ok(()));
    }

    #[test]
    fn tampered_fields_fail_mac_verification() {
        let signer = signer();
        let client = ClientId::new("203.0.113.4");
        let raw = signer.issue(&client, 5_000, None);

        // Promote our own priority to the front of the line.
        let tampered = raw.replacen("5000", "1", 1);
        let token = SignedToken::parse(&tampered).unwrap();
        assert_eq!(
            signer.validate(&token, &client, 7_000),
            Err(TokenError::MacMismatch)
        );
    }

    #[test]
    fn foreign_key_fails_mac_verification() {
        let signer = signer();
        let other = TokenSigner::new(
            MacKey::from_bytes(b"another key".to_vec()).unwrap(),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        let client = ClientId::new("203.0.113.4");

        let raw = other.issue(&client, 5_000, None);
        let token = SignedToken::parse(&raw).unwrap();
        assert_eq!(
            signer.validate(&token, &client, 7_000),
            Err(TokenError::MacMismatch)
        );
    }

    #[test]
    fn identity_binding_is_enforced() {
        let signer = signer();
        let client = ClientId::new("203.0.113.4");
        let raw = signer.issue(&client, 5_000, None);
        let token = SignedToken::parse(&raw).unwrap();

        assert_eq!(
            signer.validate(&token, &ClientId::new("203.0.113.5"), 7_000),
            Err(TokenError::ClientIdMismatch)
        );
    }

    #[test]
    fn ids_containing_the_separator_survive_the_round_trip() {
        let signer = signer();
        for id in ["lab#7", "50%#off", "%23", "fe80::1%eth0"] {
            let client = ClientId::new(id);
            let raw = signer.issue(&client, 5_000, None);

            let token = SignedToken::parse(&raw).unwrap();
            assert_eq!(token.client_id(), &client, "id={id:?}");
            assert_eq!(signer.validate(&token, &client, 7_000), Ok(()));
        }
    }

    #[test]
    fn malformed_tokens_are_format_errors() {
        for raw in [
            "",
            "a#b#c",
            "client#1#2#3#mac#extra",
            "client#notanumber#2#3#mac",
            "client#1#notanumber#3#mac",
            "client#1#2#notanumber#mac",
        ] {
            assert_eq!(SignedToken::parse(raw).unwrap_err(), TokenError::Format, "raw={raw:?}");
        }
    }
}
