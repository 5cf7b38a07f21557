use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Decimal places kept when coordinates are turned into request keys (~11 m).
pub const KEY_PRECISION_DECIMALS: u32 = 4;

/// Geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinate> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(InvalidCoordinate::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidCoordinate::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidCoordinate {
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
}

/// Deduplication key for forecast requests.
///
/// Coordinates are stored as fixed-point integers so nearby fixes that round
/// to the same position share one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForecastRequestKey {
    lat_fixed: i64,
    lon_fixed: i64,
    days: u32,
}

impl ForecastRequestKey {
    pub fn new(coord: Coordinate, days: u32) -> Self {
        let scale = 10f64.powi(KEY_PRECISION_DECIMALS as i32);
        Self {
            lat_fixed: (coord.latitude * scale).round() as i64,
            lon_fixed: (coord.longitude * scale).round() as i64,
            days,
        }
    }
}

/// One pollen category (tree, grass, weed) for a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollenTypeReading {
    /// Upstream code such as "GRASS"; empty when absent
    pub code: String,
    pub name: String,
    /// Universal pollen index, clamped to 0..=5
    pub index_value: u8,
    /// Upstream category label, or "N/A"
    pub category: String,
    pub description: String,
    pub recommendations: Vec<String>,
    pub in_season: Option<bool>,
}

/// A plant species reported for the area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantReading {
    pub code: String,
    pub name: String,
    /// Plant type such as "TREE", or "N/A"
    pub plant_type: String,
    pub family: Option<String>,
    pub season: Option<String>,
    pub description: Option<String>,
    pub picture_url: Option<String>,
    pub in_season: bool,
}

/// Today's forecast. Later days from upstream are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub pollen_types: Vec<PollenTypeReading>,
    pub plants: Vec<PlantReading>,
}

/// An upstream index outside 0..=5 that was clamped during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalousValue {
    pub code: String,
    pub raw_value: i64,
    pub clamped_to: u8,
}

/// Location service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location is not supported on this platform")]
    Unsupported,
    #[error("Location permission denied")]
    Denied,
    #[error("Location request timed out")]
    Timeout,
    #[error("Location error: {0}")]
    Other(String),
}

/// Forecast request failure. `status` is 0 for transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Forecast request failed (status {status}): {message}")]
pub struct FetchError {
    pub status: u16,
    pub message: String,
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.status == 0
    }
}

/// Normalization errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed forecast response: {0}")]
    MalformedResponse(String),
}

/// Broad failure class, used to pick a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoLocation,
    ServiceUnreachable,
    MalformedData,
}

/// Why the pipeline ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Malformed forecast response: {0}")]
    Malformed(String),
}

impl From<NormalizeError> for FailureReason {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::MalformedResponse(msg) => FailureReason::Malformed(msg),
        }
    }
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureReason::Location(_) => FailureKind::NoLocation,
            FailureReason::Fetch(_) => FailureKind::ServiceUnreachable,
            FailureReason::Malformed(_) => FailureKind::MalformedData,
        }
    }

    /// User-facing remediation text.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::Location(LocationError::Denied) => {
                "Location permission was denied. Grant access and try again."
            }
            FailureReason::Location(LocationError::Unsupported) => {
                "No location source is available. Pass a position explicitly."
            }
            FailureReason::Location(_) => "Could not determine your location. Please try again.",
            FailureReason::Fetch(_) => {
                "The pollen service could not be reached. Please try again."
            }
            FailureReason::Malformed(_) => {
                "The pollen service returned unexpected data. Please report this issue."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert_eq!(
            Coordinate::new(90.5, 0.0),
            Err(InvalidCoordinate::Latitude(90.5))
        );
        assert_eq!(
            Coordinate::new(0.0, -180.5),
            Err(InvalidCoordinate::Longitude(-180.5))
        );
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_request_key_rounds_coordinates() {
        let a = Coordinate::new(32.320_01, 35.32).unwrap();
        let b = Coordinate::new(32.319_99, 35.320_04).unwrap();
        assert_eq!(ForecastRequestKey::new(a, 1), ForecastRequestKey::new(b, 1));
    }

    #[test]
    fn test_request_key_differs_by_position_and_days() {
        let a = Coordinate::new(32.32, 35.32).unwrap();
        let b = Coordinate::new(32.33, 35.32).unwrap();
        assert_ne!(ForecastRequestKey::new(a, 1), ForecastRequestKey::new(b, 1));
        assert_ne!(ForecastRequestKey::new(a, 1), ForecastRequestKey::new(a, 2));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            FailureReason::from(LocationError::Denied).kind(),
            FailureKind::NoLocation
        );
        assert_eq!(
            FailureReason::from(FetchError::transport("refused")).kind(),
            FailureKind::ServiceUnreachable
        );
        assert_eq!(
            FailureReason::from(NormalizeError::MalformedResponse("x".into())).kind(),
            FailureKind::MalformedData
        );
    }

    #[test]
    fn test_failure_messages_differ_by_kind() {
        let denied = FailureReason::Location(LocationError::Denied).user_message();
        let fetch = FailureReason::Fetch(FetchError::transport("x")).user_message();
        let malformed = FailureReason::Malformed("x".into()).user_message();
        assert!(denied.contains("permission"));
        assert_ne!(fetch, malformed);
        assert!(malformed.contains("report"));
    }
}
