//! The response contract for non-admitted requests.
//!
//! When a request is not admitted, the controller answers with a
//! [`RetryAdvice`]: a category, a human-readable reason, an approximate
//! rank when one is meaningful, a numeric retry hint, and (on non-terminal
//! outcomes) a refreshed token for the client to carry back.

use serde::{Deserialize, Serialize};

/// Category of a non-admission response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// No token on the request; a fresh raincheck was issued.
    FirstContact,
    /// The client holds a place in line; the token was renewed.
    Queued,
    /// The client's request is already executing; duplicates are rejected.
    Processing,
    /// The client was served recently and is in its cool-down window.
    AlreadyAccepted,
    /// The presented token failed parsing or validation.
    InvalidToken,
}

impl std::fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FirstContact => "first_contact",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::AlreadyAccepted => "already_accepted",
            Self::InvalidToken => "invalid_token",
        };
        f.write_str(s)
    }
}

/// A token to hand back to the client, with its transport key and TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Transport key (cookie name), derived from the route.
    pub key: String,
    /// The opaque signed token value.
    pub value: String,
    /// Suggested client-side TTL in milliseconds.
    pub max_age_ms: u64,
}

/// Everything a non-admitted client needs: why it was deferred, roughly
/// where it stands, when to come back, and the token to come back with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAdvice {
    /// Outcome category.
    pub status: AdmissionStatus,

    /// Human-readable reason.
    pub detail: String,

    /// Approximate count of distinct clients ahead; absent when not
    /// meaningful (e.g. on validation failures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,

    /// Suggested delay before retrying, in milliseconds.
    pub retry_after_ms: u64,

    /// Refreshed token, absent on validation failures (a bad token is
    /// never reissued).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<IssuedToken>,
}

impl RetryAdvice {
    /// Whether this advice carries a refreshed token.
    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_status_and_skips_empty_fields() {
        let advice = RetryAdvice {
            status: AdmissionStatus::InvalidToken,
            detail: "MAC verification fail".to_owned(),
            rank: None,
            retry_after_ms: 1_000,
            token: None,
        };

        let json = serde_json::to_value(&advice).unwrap();
        assert_eq!(json["status"], "invalid_token");
        assert_eq!(json["detail"], "MAC verification fail");
        assert_eq!(json["retry_after_ms"], 1_000);
        assert!(json.get("rank").is_none());
        assert!(json.get("token").is_none());
    }

    #[test]
    fn round_trips_with_token() {
        let advice = RetryAdvice {
            status: AdmissionStatus::Queued,
            detail: "Waiting in the admission queue".to_owned(),
            rank: Some(2.5856),
            retry_after_ms: 1_000,
            token: Some(IssuedToken {
                key: "raincheck#/rc_prime".to_owned(),
                value: "c#1#2#3#mac".to_owned(),
                max_age_ms: 11_000,
            }),
        };

        let json = serde_json::to_string(&advice).unwrap();
        let back: RetryAdvice = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, AdmissionStatus::Queued);
        assert_eq!(back.token, advice.token);
        assert_eq!(back.rank, advice.rank);
    }
}
