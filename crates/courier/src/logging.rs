//! Tracing installation for binaries and tests.
//!
//! The library itself only emits `tracing` events; whoever owns `main`
//! decides where they go. Filtering is per-target with the usual
//! dotted-prefix inheritance, controlled through `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a stderr subscriber honoring `RUST_LOG`, defaulting to warn.
/// Calling it twice is harmless.
pub fn install() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
