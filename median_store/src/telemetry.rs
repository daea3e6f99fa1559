//! Logging initialization.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    if config.format == "json" {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing::info!(format = %config.format, "logging initialized");
    Ok(())
}
