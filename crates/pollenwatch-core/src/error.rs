//! Application-level errors for PollenWatch.
//!
//! Each variant keeps its technical detail for logs and maps to a short
//! message that tells the user what to do next.

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a display-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pollen service error: {0}")]
    Pollen(#[from] PollenError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.user_message(),
            AppError::Pollen(e) => e.user_message(),
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => {
                "The configuration is invalid. Fix config.toml and try again."
            }
            ConfigError::MissingSetting(_) => {
                "A required setting is missing. Set it in config.toml or the environment."
            }
        }
    }
}

/// Pollen pipeline failures, grouped by what the user can do about them.
#[derive(Debug, Error)]
pub enum PollenError {
    #[error("Location unavailable: {0}")]
    NoLocation(String),

    #[error("Pollen service unreachable: {0}")]
    ServiceUnreachable(String),

    #[error("Malformed pollen data: {0}")]
    MalformedData(String),
}

impl PollenError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PollenError::NoLocation(_) => {
                "Your location is unavailable. Grant location access or pass a position."
            }
            PollenError::ServiceUnreachable(_) => {
                "The pollen service could not be reached. Please try again."
            }
            PollenError::MalformedData(_) => {
                "The pollen service returned unexpected data. Please report this issue."
            }
        }
    }
}
