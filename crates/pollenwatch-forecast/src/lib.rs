//! Pollen forecast pipeline for PollenWatch
//!
//! Acquires the device location, fetches a pollen forecast from the Google
//! Pollen API (coalescing identical in-flight requests), normalizes the
//! response and classifies it into risk tiers.

pub mod types;
pub mod client;
pub mod coalesce;
pub mod geocode;
pub mod location;
pub mod normalize;
pub mod pipeline;
pub mod risk;

pub use types::*;
pub use client::{FetchResult, ForecastClient, ForecastClientConfig};
pub use geocode::Geocoder;
pub use location::{FixedPositionSource, LocationProvider, PositionSource};
pub use normalize::{normalize, NormalizedForecast};
pub use pipeline::{PipelineController, PipelineSettings, PipelineState, Render, TransitionError};
pub use risk::{classify, overall_tier, RiskTier};
