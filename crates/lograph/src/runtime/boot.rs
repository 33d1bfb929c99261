//! Boot — logging init and config load.

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::conf::{ConfigError, LographConfig};

/// Initialise the tracing / logging subsystem.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lograph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load and validate the configuration.
pub fn boot() -> Result<LographConfig, ConfigError> {
    info!("Starting lograph v{}", env!("CARGO_PKG_VERSION"));

    let config = LographConfig::load()?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        ConfigError::Invalid(e)
    })?;

    info!(
        "Loaded configuration: sources={}, parallel={}, consolidate={}, split_by_week={}",
        config.sources.len(),
        config.parallel,
        config.consolidate,
        config.split_by_week
    );
    if !config.regions.is_empty() {
        info!("Region table: {} prefixes", config.regions.len());
    }

    Ok(config)
}
