//! Tracing subscriber setup for tests, benches and embedding hosts.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber honoring `RUST_LOG`.
///
/// Idempotent: repeated calls (e.g. from several integration tests in the
/// same process) are no-ops after the first.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
