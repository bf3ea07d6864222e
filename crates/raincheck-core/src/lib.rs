//! RainCheck Core - Types and token protocol for cookie-carried admission control
//!
//! This crate provides the platform-facing types for RainCheck: client
//! identity, priorities, per-route configuration, the signed retry-token
//! protocol, the rank-estimation sketch, and the response contract handed
//! back to non-admitted clients. The admission engine itself lives in
//! `raincheck-engine`.
//!
//! Everything here is synchronous and runtime-agnostic.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod clock;
mod config;
mod error;
mod identity;
mod response;
mod sketch;
mod token;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use identity::*;
pub use response::*;
pub use sketch::*;
pub use token::*;
