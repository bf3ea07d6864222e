//! RainCheck Engine - Stateless, cookie-carried admission control
//!
//! Protects a slow or resource-limited handler from overload. Instead of
//! dropping excess requests, each client gets a signed retry token (a
//! "raincheck") encoding its original arrival time; the server keeps only
//! a small bounded amount of queueing state and the client carries the
//! rest back and forth inside the token.
//!
//! Components:
//!
//! - [`AdmissionQueue`]: bounded min-priority ticket queue with overflow
//!   eviction of the lowest-urgency ticket.
//! - [`ReadyWindow`]: concurrency-bounded buffer of clients cleared to
//!   execute, with per-entry expiry.
//! - [`ExpiringSet`]: TTL set backing the post-success cool-down.
//! - A dispatcher task promoting queued tickets into the ready window as
//!   capacity allows.
//! - [`AdmissionController`]: the per-request decision protocol tying the
//!   above together.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use raincheck_core::{MacKey, RaincheckConfig};
//! use raincheck_engine::{Admission, AdmissionController};
//!
//! let config = RaincheckConfig::new(
//!     "/rc_prime",
//!     3,
//!     Duration::from_secs(1),
//!     Duration::from_secs(10),
//!     1,
//!     MacKey::generate(),
//! )?;
//! let controller = AdmissionController::new(config);
//!
//! match controller.admit(remote_addr, None, token, handler).await? {
//!     Admission::Admitted(response) => respond(response),
//!     Admission::Deferred(advice) => respond_retry(advice),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod controller;
mod dispatcher;
mod error;
mod expiring;
mod queue;
mod window;

pub use controller::*;
pub use error::*;
pub use expiring::*;
pub use queue::*;
pub use window::*;
