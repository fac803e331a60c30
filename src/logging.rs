//! Structured logging for the provider process.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host reads
//! on startup. Filtering follows `RUST_LOG`.
//!
//! ```bash
//! # Trace every rate-limit retry
//! RUST_LOG=circleci_provider::transport=debug circleci-provider
//!
//! # Everything, including the gRPC stack
//! RUST_LOG=debug circleci-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LEVEL: &str = "info";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the stderr subscriber at [`DEFAULT_LEVEL`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LEVEL);
}

/// Install the stderr subscriber, falling back to `default_level` when
/// `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Like [`init_logging`], but returns `false` instead of panicking when a
/// subscriber is already installed.
pub fn try_init_logging() -> bool {
    subscriber(DEFAULT_LEVEL).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // Installing the global subscriber here would collide with
    // `#[traced_test]` elsewhere in the crate; see tests/logging.rs.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new(DEFAULT_LEVEL).is_ok());
        assert!(EnvFilter::try_new("circleci_provider::transport=debug").is_ok());
        assert!(EnvFilter::try_new("warn,circleci_provider=debug").is_ok());
    }
}
