//! Reverse geocoding: convert coordinates to a display city name.
//! Uses the Google Geocoding API. Display only; the pollen pipeline never
//! depends on it.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::types::Coordinate;

const GEOCODE_PATH: &str = "/maps/api/geocode/json";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

/// Reverse geocoder bound to one API key.
pub struct Geocoder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl Geocoder {
    /// Returns `None` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Option<Self> {
        let client = match Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to create geocoding client: {}", e.without_url());
                return None;
            }
        };

        Some(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    /// Reverse geocode to a city name.
    /// Returns `None` on failure or timeout; the caller can fall back to coordinates.
    pub async fn city_name(&self, coord: Coordinate) -> Option<String> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), GEOCODE_PATH);
        let latlng = format!("{},{}", coord.latitude, coord.longitude);

        let response = match self
            .client
            .get(&url)
            .query(&[("latlng", latlng.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Reverse geocode request failed: {}", e.without_url());
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Reverse geocode returned status {}", response.status());
            return None;
        }

        let body: GeocodeResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Reverse geocode parse error: {}", e.without_url());
                return None;
            }
        };

        let city = city_from_response(body)?;
        tracing::info!("Reverse geocoded to: {}", city);
        Some(city)
    }
}

/// Prefer the `locality` component of the first result, else its second
/// component (usually the city for street-level results).
fn city_from_response(body: GeocodeResponse) -> Option<String> {
    if let Some(status) = body.status.as_deref() {
        if status != "OK" {
            tracing::debug!("Reverse geocode status {}", status);
            return None;
        }
    }

    let mut components = body.results.into_iter().next()?.address_components;
    if let Some(idx) = components
        .iter()
        .position(|c| c.types.iter().any(|t| t == "locality"))
    {
        return Some(components.swap_remove(idx).long_name);
    }
    if components.len() > 1 {
        return Some(components.swap_remove(1).long_name);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(value: serde_json::Value) -> GeocodeResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_city_prefers_locality() {
        let body = parse(serde_json::json!({
            "status": "OK",
            "results": [{
                "address_components": [
                    { "long_name": "12", "types": ["street_number"] },
                    { "long_name": "Herzl", "types": ["route"] },
                    { "long_name": "Haifa", "types": ["locality", "political"] }
                ]
            }]
        }));
        assert_eq!(city_from_response(body).as_deref(), Some("Haifa"));
    }

    #[test]
    fn test_city_falls_back_to_second_component() {
        let body = parse(serde_json::json!({
            "status": "OK",
            "results": [{
                "address_components": [
                    { "long_name": "Route 6" },
                    { "long_name": "Nazareth" }
                ]
            }]
        }));
        assert_eq!(city_from_response(body).as_deref(), Some("Nazareth"));
    }

    #[test]
    fn test_city_none_on_denied_or_empty() {
        let denied = parse(serde_json::json!({ "status": "REQUEST_DENIED", "results": [] }));
        assert_eq!(city_from_response(denied), None);

        let empty = parse(serde_json::json!({ "status": "OK", "results": [] }));
        assert_eq!(city_from_response(empty), None);
    }

    #[tokio::test]
    async fn test_city_name_queries_latlng() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/maps/api/geocode/json"))
            .and(query_param("latlng", "32.32,35.32"))
            .and(query_param("key", "geo-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "results": [{
                    "address_components": [
                        { "long_name": "Afula", "types": ["locality"] }
                    ]
                }]
            })))
            .mount(&mock_server)
            .await;

        let geocoder = Geocoder::new("geo-key", mock_server.uri()).unwrap();
        let coord = Coordinate::new(32.32, 35.32).unwrap();
        assert_eq!(geocoder.city_name(coord).await.as_deref(), Some("Afula"));
    }

    #[tokio::test]
    async fn test_city_name_none_on_http_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let geocoder = Geocoder::new("geo-key", mock_server.uri()).unwrap();
        let coord = Coordinate::new(32.32, 35.32).unwrap();
        assert_eq!(geocoder.city_name(coord).await, None);
    }
}
