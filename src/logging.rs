//! Tracing subscriber setup for binaries and examples.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the application. `RUST_LOG` takes precedence over the configured
//! level so a single run can be made more verbose without editing config.

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` if set and valid, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already set (e.g. by a test
/// harness), in which case the existing one is kept.
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}

