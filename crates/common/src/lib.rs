//! Foundation utilities shared across cachette crates.
//!
//! This crate has no knowledge of caching. It provides:
//! - `error`: the error classification contract used to route failures to
//!   the right log level
//! - `time`: a clock abstraction so TTL and expiry logic can be driven by a
//!   deterministic clock in tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod time;

pub use error::{ErrorClassification, ErrorSeverity};
pub use time::{Clock, MockClock, SystemClock};
