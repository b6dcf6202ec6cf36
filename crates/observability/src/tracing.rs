//! Tracing/logging initialization.
//!
//! Structured JSON logs filtered through `RUST_LOG`. The processor and the
//! resilient store lean on `tracing` for their failover/requeue signals, so
//! binaries embedding them should call [`init`] (or [`init_with_filter`])
//! early in `main`.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    init_with_filter(filter);
}

/// Initialize with an explicit filter, ignoring the environment.
///
/// Useful for embedding hosts that manage their own log configuration.
pub fn init_with_filter(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
