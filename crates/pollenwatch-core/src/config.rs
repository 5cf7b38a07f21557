use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable overriding `forecast.api_key`.
pub const POLLEN_API_KEY_ENV: &str = "POLLENWATCH_POLLEN_API_KEY";
/// Environment variable overriding `geocode.api_key`.
pub const GEOCODE_API_KEY_ENV: &str = "POLLENWATCH_GEOCODE_API_KEY";

pub const DEFAULT_FORECAST_BASE_URL: &str = "https://pollen.googleapis.com";
pub const DEFAULT_GEOCODE_BASE_URL: &str = "https://maps.googleapis.com";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Pollen forecast endpoint settings
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Reverse geocoding (display city name only)
    #[serde(default)]
    pub geocode: GeocodeConfig,

    /// Location acquisition bounds and optional fixed position
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Google Pollen API key. Never written back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_forecast_base_url")]
    pub base_url: String,

    /// Number of forecast days requested upstream (only today is kept)
    #[serde(default = "default_days")]
    pub days: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional BCP-47 language code for descriptions, e.g. "en"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

fn default_forecast_base_url() -> String {
    DEFAULT_FORECAST_BASE_URL.to_string()
}

fn default_days() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_forecast_base_url(),
            days: default_days(),
            request_timeout_secs: default_request_timeout_secs(),
            language_code: None,
        }
    }
}

impl std::fmt::Debug for ForecastConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("base_url", &self.base_url)
            .field("days", &self.days)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("language_code", &self.language_code)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    /// Google Geocoding API key. Never written back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_geocode_base_url")]
    pub base_url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_geocode_base_url() -> String {
    DEFAULT_GEOCODE_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_geocode_base_url(),
            enabled: true,
        }
    }
}

impl std::fmt::Debug for GeocodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("base_url", &self.base_url)
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn redacted(key: &Option<String>) -> &'static str {
    if key.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Give up on a position fix after this long
    #[serde(default = "default_location_timeout_ms")]
    pub timeout_ms: u64,

    /// Reuse a fix younger than this instead of asking again
    #[serde(default = "default_max_cache_age_ms")]
    pub max_cache_age_ms: u64,

    /// Fixed position used when no device sensor is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

fn default_location_timeout_ms() -> u64 {
    10_000
}

fn default_max_cache_age_ms() -> u64 {
    60_000
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_location_timeout_ms(),
            max_cache_age_ms: default_max_cache_age_ms(),
            latitude: None,
            longitude: None,
        }
    }
}

impl LocationConfig {
    /// Configured fixed position, if both halves are present.
    pub fn fixed_position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from the default path, creating it if it doesn't exist.
    /// Credential env vars are applied after loading.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from an explicit path, writing defaults there first if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Overlay credentials from the environment (or any lookup, for tests).
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(POLLEN_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.forecast.api_key = Some(key);
        }
        if let Some(key) = lookup(GEOCODE_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.geocode.api_key = Some(key);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.forecast.base_url, "forecast.base_url", &mut result);
        validate_url(&self.geocode.base_url, "geocode.base_url", &mut result);

        if self.forecast.days == 0 {
            result.add_error("forecast.days", "Must request at least 1 day");
        } else if self.forecast.days > 5 {
            result.add_warning(
                "forecast.days",
                "Upstream serves at most 5 days; only today is used anyway",
            );
        }

        if self.forecast.request_timeout_secs == 0 {
            result.add_error(
                "forecast.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.forecast.api_key.is_none() {
            result.add_warning(
                "forecast.api_key",
                format!("Pollen API key not configured (set {})", POLLEN_API_KEY_ENV),
            );
        }

        if self.geocode.enabled && self.geocode.api_key.is_none() {
            result.add_warning(
                "geocode.api_key",
                "Geocoding API key not configured - city names will be unavailable",
            );
        }

        if self.location.timeout_ms == 0 {
            result.add_error("location.timeout_ms", "Location timeout must be greater than 0");
        }

        match (self.location.latitude, self.location.longitude) {
            (Some(lat), Some(lon)) => {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    result.add_error("location.latitude", "Latitude must be within [-90, 90]");
                }
                if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                    result.add_error(
                        "location.longitude",
                        "Longitude must be within [-180, 180]",
                    );
                }
            }
            (None, None) => {}
            _ => {
                result.add_error(
                    "location",
                    "latitude and longitude must be set together",
                );
            }
        }

        result
    }

    /// Save configuration to an explicit path. API keys are skipped.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("pollenwatch");

        Ok(config_dir.join("config.toml"))
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }

            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}
