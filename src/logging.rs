//! Tracing subscriber bootstrap.

use std::env;

use tracing_subscriber::EnvFilter;

/// Filter used when neither environment variable holds a usable directive.
pub const DEFAULT_FILTER: &str = "info,edictl=debug";

/// Environment variable consulted after `RUST_LOG`.
pub const LOG_ENV: &str = "EDICTL_LOG";

/// Install the global `fmt` subscriber.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `EDICTL_LOG`
/// 3) [`DEFAULT_FILTER`]
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init() {
    let installed = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter_from_env())
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    filter_from(env::var(LOG_ENV).ok().as_deref())
}

fn filter_from(value: Option<&str>) -> EnvFilter {
    if let Some(value) = value.filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }
    EnvFilter::new(DEFAULT_FILTER)
}
