//! Reshape the Pollen API `forecast:lookup` payload into [`DailyForecast`].
//!
//! Optional fields fall back to defaults. Only the structural shape
//! (`dailyInfo`, `pollenTypeInfo`, `plantInfo` arrays and the date) is
//! allowed to fail.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::risk::{clamp_index, MAX_INDEX};
use crate::types::{AnomalousValue, DailyForecast, NormalizeError, PlantReading, PollenTypeReading};

pub const NOT_AVAILABLE: &str = "N/A";
pub const NO_DESCRIPTION: &str = "No description available.";

/// A normalized day plus any values that had to be clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedForecast {
    pub forecast: DailyForecast,
    pub anomalies: Vec<AnomalousValue>,
}

// API Response Types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLookupResponse {
    // Later days are never read, so their shape is not checked.
    daily_info: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDayInfo {
    date: Option<ApiDate>,
    pollen_type_info: Option<Vec<ApiPollenType>>,
    plant_info: Option<Vec<ApiPlant>>,
}

#[derive(Debug, Deserialize)]
struct ApiDate {
    year: i32,
    month: u32,
    day: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPollenType {
    code: Option<String>,
    display_name: Option<String>,
    in_season: Option<bool>,
    index_info: Option<ApiIndexInfo>,
    health_recommendations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiIndexInfo {
    value: Option<i64>,
    category: Option<String>,
    index_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPlant {
    code: Option<String>,
    display_name: Option<String>,
    in_season: Option<bool>,
    plant_description: Option<ApiPlantDescription>,
}

#[derive(Debug, Deserialize)]
struct ApiPlantDescription {
    #[serde(rename = "type")]
    plant_type: Option<String>,
    family: Option<String>,
    season: Option<String>,
    description: Option<String>,
    picture: Option<String>,
}

/// Normalize a raw lookup payload. Only `dailyInfo[0]` is kept.
pub fn normalize(payload: &Value) -> Result<NormalizedForecast, NormalizeError> {
    let response = ApiLookupResponse::deserialize(payload)
        .map_err(|e| NormalizeError::MalformedResponse(e.to_string()))?;

    let days = response
        .daily_info
        .ok_or_else(|| malformed("missing dailyInfo"))?;
    let first = days
        .into_iter()
        .next()
        .ok_or_else(|| malformed("dailyInfo is empty"))?;
    let today = ApiDayInfo::deserialize(first)
        .map_err(|e| malformed(format!("dailyInfo[0]: {}", e)))?;

    let date = today.date.ok_or_else(|| malformed("missing dailyInfo[0].date"))?;
    let date = NaiveDate::from_ymd_opt(date.year, date.month, date.day).ok_or_else(|| {
        malformed(format!(
            "invalid date {}-{}-{}",
            date.year, date.month, date.day
        ))
    })?;

    let mut anomalies = Vec::new();
    let pollen_types = today
        .pollen_type_info
        .unwrap_or_default()
        .into_iter()
        .map(|raw| pollen_type_reading(raw, &mut anomalies))
        .collect();

    let plants = today
        .plant_info
        .unwrap_or_default()
        .into_iter()
        .map(plant_reading)
        .collect();

    Ok(NormalizedForecast {
        forecast: DailyForecast {
            date,
            pollen_types,
            plants,
        },
        anomalies,
    })
}

fn malformed(msg: impl Into<String>) -> NormalizeError {
    NormalizeError::MalformedResponse(msg.into())
}

fn pollen_type_reading(raw: ApiPollenType, anomalies: &mut Vec<AnomalousValue>) -> PollenTypeReading {
    let code = raw.code.unwrap_or_default();
    let name = raw.display_name.unwrap_or_else(|| code.clone());
    let (raw_value, category, description) = match raw.index_info {
        Some(info) => (
            info.value.unwrap_or(0),
            info.category.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            info.index_description
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        ),
        None => (0, NOT_AVAILABLE.to_string(), NO_DESCRIPTION.to_string()),
    };

    let index_value = clamp_index(raw_value);
    if !(0..=MAX_INDEX).contains(&raw_value) {
        tracing::warn!(
            code = %code,
            raw_value,
            clamped_to = index_value,
            "Pollen index outside 0..=5, clamping"
        );
        anomalies.push(AnomalousValue {
            code: code.clone(),
            raw_value,
            clamped_to: index_value,
        });
    }

    PollenTypeReading {
        code,
        name,
        index_value,
        category,
        description,
        recommendations: raw.health_recommendations.unwrap_or_default(),
        in_season: raw.in_season,
    }
}

fn plant_reading(raw: ApiPlant) -> PlantReading {
    let code = raw.code.unwrap_or_default();
    let name = raw.display_name.unwrap_or_else(|| code.clone());
    let desc = raw.plant_description;
    let (plant_type, family, season, description, picture_url) = match desc {
        Some(d) => (
            d.plant_type.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            d.family,
            d.season,
            d.description,
            d.picture,
        ),
        None => (NOT_AVAILABLE.to_string(), None, None, None, None),
    };

    PlantReading {
        code,
        name,
        plant_type,
        family,
        season,
        description,
        picture_url,
        in_season: raw.in_season.unwrap_or(false),
    }
}
