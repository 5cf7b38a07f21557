pub mod config;
pub mod error;

pub use config::{Config, ForecastConfig, GeocodeConfig, LocationConfig, ValidationResult};
pub use error::{AppError, ConfigError, PollenError};

use anyhow::Result;

/// Initialize tracing with `RUST_LOG`, falling back to the given directive.
pub fn init_with_default(default_directive: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::debug!("PollenWatch core initialized");
    Ok(())
}
