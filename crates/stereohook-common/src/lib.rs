//! Shared utilities for stereohook: logging, error types, environment helpers.
//!
//! This crate provides common infrastructure used by the engine, the runtime
//! backend and the injected plugin.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;

pub use error::{Error, Result};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set. Returns `false` when the host process
/// already installed a global subscriber.
pub fn init_tracing() -> bool {
    init_tracing_with_default("info")
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
