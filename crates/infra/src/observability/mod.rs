//! Tracing subscriber setup.
//!
//! Every swallowed backend failure is emitted as a `warn!` event carrying a
//! `cache_adapter` field; this module installs the subscriber that routes
//! those events somewhere useful.
//!
//! The filter comes from `CACHETTE_LOG`, then `RUST_LOG`, then defaults to
//! `info`.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted first for the filter directive.
pub const LOG_ENV: &str = "CACHETTE_LOG";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Tracing could not be installed.
#[derive(Error, Debug)]
pub enum TracingInitError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`TracingInitError::AlreadyInstalled`] when called a second time (or
/// after any other crate installed a subscriber), and
/// [`TracingInitError::Filter`] for an unparsable filter directive.
pub fn init_tracing(format: LogFormat) -> Result<(), TracingInitError> {
    let filter = env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(true)).try_init(),
    };
    installed.map_err(|e| TracingInitError::AlreadyInstalled(e.to_string()))
}

fn env_filter() -> Result<EnvFilter, TracingInitError> {
    let directive = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(&directive)
        .map_err(|e| TracingInitError::Filter(format!("{directive}: {e}")))
}
