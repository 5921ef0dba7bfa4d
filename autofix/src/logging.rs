//! Diagnostics via `tracing`, written to stderr.
//!
//! The final verdict lines printed by the binary are product output on
//! stdout and are unaffected by `RUST_LOG`. Audit logs live in the artifact
//! directory (see `io::artifacts`).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` so CI logs show each repair step.
///
/// ```bash
/// RUST_LOG=autofix=debug autofix --max-iterations 2
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
