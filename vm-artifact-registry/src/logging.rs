//! Global tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

use crate::config::LoggingConfig;

/// Build the level filter; `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level '{}'", config.level))?
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    Ok(filter)
}

/// Install the global subscriber, human-readable or JSON.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let subscriber = registry().with(env_filter(config)?);

    if config.json {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install JSON log subscriber")?;
    } else {
        subscriber
            .with(fmt::layer().with_target(false))
            .try_init()
            .context("Failed to install log subscriber")?;
    }
    Ok(())
}
