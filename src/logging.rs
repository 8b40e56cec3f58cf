//! Logging setup for applications embedding quarry.
//!
//! quarry itself only emits `tracing` events: connections opened at `info`,
//! transaction control and schema SQL at `debug`, suppressed failures at
//! `warn`. These helpers install a stderr subscriber for binaries and tests
//! that have none of their own.

use crate::error::{QuarryError, Result};
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initializes logging to stderr, honouring `RUST_LOG`.
///
/// Panics if a global subscriber is already installed; use [`try_init`]
/// where that can happen.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Like [`init_stderr_logging`], but reports an already-installed
/// subscriber as an error.
pub fn try_init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| QuarryError::internal(format!("Failed to initialize logging: {e}")))
}
