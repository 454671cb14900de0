//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through the RUST_LOG environment
//! variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Filtering comes from RUST_LOG and defaults to "warn" so CLI output stays
/// quiet.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - lifecycle and team transitions
/// - `RUST_LOG=godel=debug` - internal bookkeeping and event publication
/// - `RUST_LOG=godel::budget=debug,godel::execution=info` - per module
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init() -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .pretty(),
        )
        .try_init()
        .map_err(|e| crate::GodelError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}
