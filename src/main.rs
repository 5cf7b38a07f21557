//! PollenWatch CLI - today's pollen forecast and allergy risk for a location.

mod report;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pollenwatch_core::{AppError, Config, ConfigError, PollenError};
use pollenwatch_forecast::{
    Coordinate, FixedPositionSource, ForecastClient, ForecastClientConfig, Geocoder,
    LocationProvider, PipelineController, PipelineSettings, PipelineState, Render,
};

use crate::report::{pollen_error, TextReport};

#[derive(Parser)]
#[command(name = "pollenwatch")]
#[command(about = "Show today's pollen forecast and allergy risk", long_about = None)]
struct Args {
    /// Latitude in decimal degrees (overrides the configured position)
    #[arg(long, requires = "longitude", allow_negative_numbers = true)]
    latitude: Option<f64>,

    /// Longitude in decimal degrees (overrides the configured position)
    #[arg(long, requires = "latitude", allow_negative_numbers = true)]
    longitude: Option<f64>,

    /// Number of forecast days to request (only today is shown)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    days: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "PollenWatch failed");
            eprintln!("Error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    pollenwatch_core::init_with_default(if args.verbose { "debug" } else { "info" })?;

    let (config, _) = Config::load_validated()
        .map_err(|e| ConfigError::Invalid(format!("{:#}", e)))?;

    let api_key = config.forecast.api_key.clone().ok_or_else(|| {
        ConfigError::MissingSetting(format!(
            "forecast.api_key (or {})",
            pollenwatch_core::config::POLLEN_API_KEY_ENV
        ))
    })?;

    let client_config = ForecastClientConfig::new(api_key)
        .with_base_url(config.forecast.base_url.clone())
        .with_timeout(Duration::from_secs(config.forecast.request_timeout_secs))
        .with_language_code(config.forecast.language_code.clone());
    let client = ForecastClient::new(client_config)
        .map_err(|e| PollenError::ServiceUnreachable(e.to_string()))?;

    let position = resolve_position(&args, &config)?;
    let locator = match position {
        Some(coord) => LocationProvider::new(Arc::new(FixedPositionSource::new(coord))),
        None => {
            tracing::info!("No position configured; device location is unavailable");
            LocationProvider::unsupported()
        }
    };

    let settings = PipelineSettings {
        days: args.days.unwrap_or(config.forecast.days),
        location_timeout: Duration::from_millis(config.location.timeout_ms),
        max_cache_age: Duration::from_millis(config.location.max_cache_age_ms),
    };

    let controller = PipelineController::new(Arc::new(locator), client, settings);
    let state = controller.start().await.map_err(anyhow::Error::from)?;

    let place = match (&state, position) {
        (PipelineState::Ready { .. }, Some(coord)) => Some(place_name(&config, coord).await),
        _ => None,
    };

    print!("{}", TextReport::new(place).render(&state));

    match state {
        PipelineState::Failed(reason) => Err(pollen_error(&reason).into()),
        _ => Ok(()),
    }
}

/// CLI flags win over the configured position.
fn resolve_position(args: &Args, config: &Config) -> Result<Option<Coordinate>, ConfigError> {
    let pair = match (args.latitude, args.longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => config.location.fixed_position(),
    };

    pair.map(|(lat, lon)| Coordinate::new(lat, lon))
        .transpose()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// City name when geocoding is enabled and succeeds, else the coordinates.
async fn place_name(config: &Config, coord: Coordinate) -> String {
    if config.geocode.enabled {
        if let Some(key) = &config.geocode.api_key {
            if let Some(geocoder) = Geocoder::new(key.clone(), config.geocode.base_url.clone()) {
                if let Some(city) = geocoder.city_name(coord).await {
                    return city;
                }
            }
        }
    }
    coord.to_string()
}
