//! Process-wide logging init. Library code never
//! calls this; only binaries and tests that want output do, the same way
//! the pack's async node examples set up `tracing` once at the top of
//! `main`.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`.
/// Safe to call more than once; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
