//! Diagnostic tracing for `storyloop`.
//!
//! Tracing output is controlled by `RUST_LOG` and goes to stderr. Command
//! output (status lines, list entries) is printed to stdout and is not
//! affected by it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`, which still surfaces retry notices.
///
/// # Example
/// ```bash
/// RUST_LOG=storyloop=debug storyloop run alpha
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
