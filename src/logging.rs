use tracing_subscriber::{fmt, EnvFilter};

/// Initialises structured log output for binaries and test runs.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate.
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("storefront_core=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
