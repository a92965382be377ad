//! Logging configuration using tracing.
//!
//! Batch progress is emitted at `debug` level, per-item failures at `error`
//! level. Run with `RUST_LOG=dirvault=debug` to follow progress item by item.

use tracing_subscriber::{fmt::time::Uptime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Uptime stamps stand in for the elapsed-time prefix on every line.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(Uptime::default())
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}
