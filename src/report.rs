//! Plain-text rendering of pipeline state for the terminal.

use std::fmt::Write;

use pollenwatch_core::PollenError;
use pollenwatch_forecast::normalize::NOT_AVAILABLE;
use pollenwatch_forecast::risk::MAX_INDEX;
use pollenwatch_forecast::{
    DailyForecast, FailureKind, FailureReason, PipelineState, Render, RiskTier,
};

/// Renders a [`PipelineState`] as a human-readable report.
#[derive(Debug, Clone, Default)]
pub struct TextReport {
    place: Option<String>,
}

impl TextReport {
    /// `place` is shown in the heading (a city name or the coordinates).
    pub fn new(place: Option<String>) -> Self {
        Self { place }
    }

    fn ready(&self, forecast: &DailyForecast, tier: RiskTier) -> String {
        let mut out = String::new();
        match &self.place {
            Some(place) => {
                let _ = writeln!(out, "Pollen forecast for {} on {}", place, forecast.date);
            }
            None => {
                let _ = writeln!(out, "Pollen forecast for {}", forecast.date);
            }
        }
        let _ = writeln!(out, "Overall: {}. {}", tier.label(), tier.advice());

        let shown: Vec<_> = forecast
            .pollen_types
            .iter()
            .filter(|p| p.category != NOT_AVAILABLE)
            .collect();

        if shown.is_empty() {
            let _ = writeln!(out, "\nNo pollen readings reported.");
        }
        for reading in shown {
            let _ = writeln!(
                out,
                "\n{}: {}/{} ({})",
                reading.name, reading.index_value, MAX_INDEX, reading.category
            );
            let _ = writeln!(out, "  {}", reading.description);
            for tip in &reading.recommendations {
                let _ = writeln!(out, "  - {}", tip);
            }
        }

        if !forecast.plants.is_empty() {
            let _ = writeln!(out, "\nPlants:");
            for plant in &forecast.plants {
                let season = if plant.in_season {
                    "in season"
                } else {
                    "out of season"
                };
                let _ = writeln!(out, "  {} ({}): {}", plant.name, plant.plant_type, season);
            }
        }

        out
    }
}

impl Render for TextReport {
    type Output = String;

    fn render(&self, state: &PipelineState) -> String {
        match state {
            PipelineState::Idle => "Pollen forecast not loaded yet.\n".to_string(),
            PipelineState::Locating => "Finding your location...\n".to_string(),
            PipelineState::Fetching(coord) => {
                format!("Fetching the pollen forecast for {}...\n", coord)
            }
            PipelineState::Ready {
                forecast,
                overall_tier,
            } => self.ready(forecast, *overall_tier),
            PipelineState::Failed(reason) => format!(
                "Pollen forecast unavailable: {}\n{}\n",
                reason,
                reason.user_message()
            ),
        }
    }
}

/// Classify a pipeline failure for the application error type.
pub fn pollen_error(reason: &FailureReason) -> PollenError {
    let detail = reason.to_string();
    match reason.kind() {
        FailureKind::NoLocation => PollenError::NoLocation(detail),
        FailureKind::ServiceUnreachable => PollenError::ServiceUnreachable(detail),
        FailureKind::MalformedData => PollenError::MalformedData(detail),
    }
}
