//! RainCheck Testkit - Test support utilities
//!
//! Provides a manually-advanced [`ManualClock`] for deterministic token
//! lifetime tests and tracing initialization helpers for test output.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod clock;
mod tracing_config;

pub use clock::*;
pub use tracing_config::*;
