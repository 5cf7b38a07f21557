//! Google Pollen API `forecast:lookup` client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::instrument;

use crate::coalesce::{Registration, RequestCoalescer};
use crate::types::{Coordinate, FetchError, ForecastRequestKey};

pub const POLLEN_API_BASE: &str = "https://pollen.googleapis.com";
const LOOKUP_PATH: &str = "/v1/forecast:lookup";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("PollenWatch/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 300;
const REDACTED: &str = "REDACTED";

pub type FetchResult = Result<Arc<Value>, FetchError>;

/// Construction-time settings. Immutable once the client is built.
#[derive(Clone)]
pub struct ForecastClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub language_code: Option<String>,
}

impl ForecastClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: POLLEN_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            language_code: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_language_code(mut self, language_code: Option<String>) -> Self {
        self.language_code = language_code;
        self
    }
}

impl std::fmt::Debug for ForecastClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("language_code", &self.language_code)
            .finish()
    }
}

/// Pollen forecast client with per-key in-flight deduplication.
///
/// Clones share the same HTTP pool and in-flight registry, so independent
/// sessions asking for the same position join one upstream call.
#[derive(Clone)]
pub struct ForecastClient {
    http: Client,
    config: Arc<ForecastClientConfig>,
    in_flight: Arc<RequestCoalescer<ForecastRequestKey, FetchResult>>,
}

impl ForecastClient {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend init).
    pub fn new(config: ForecastClientConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::transport(e.without_url().to_string()))?;

        Ok(Self {
            http,
            config: Arc::new(config),
            in_flight: Arc::new(RequestCoalescer::new()),
        })
    }

    /// Number of distinct requests currently waiting on upstream.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.in_flight_count()
    }

    /// Fetch the raw lookup payload for `coord`.
    ///
    /// A call whose key matches a request already in flight waits for that
    /// request instead of sending its own. Nothing is retried.
    ///
    /// # Errors
    ///
    /// `FetchError` with the HTTP status for non-2xx responses, or status 0
    /// for transport failures and `days == 0`.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_forecast(&self, coord: Coordinate, days: u32) -> FetchResult {
        if days == 0 {
            return Err(FetchError::transport("days must be at least 1"));
        }

        let key = ForecastRequestKey::new(coord, days);
        let mut receiver = match self.in_flight.register(key) {
            Registration::Leader { guard, receiver } => {
                let request = self.build_request(coord, days);
                let api_key = self.config.api_key.clone();
                // The send runs detached so a cancelled caller doesn't cancel
                // the request for everyone else waiting on it.
                tokio::spawn(async move {
                    let result = send_lookup(request, &api_key).await;
                    guard.complete(result);
                });
                receiver
            }
            Registration::Follower(receiver) => {
                tracing::debug!("Joined in-flight forecast request");
                receiver
            }
        };

        let stats = self.in_flight.stats();
        tracing::debug!(
            total = stats.total_requests,
            coalesced = stats.coalesced_requests,
            "Forecast request coalescing"
        );

        match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(FetchError::transport("forecast request was abandoned")),
        }
    }

    fn build_request(&self, coord: Coordinate, days: u32) -> reqwest::RequestBuilder {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            LOOKUP_PATH
        );

        let mut query: Vec<(&str, String)> = vec![
            ("key", self.config.api_key.clone()),
            ("location.latitude", coord.latitude.to_string()),
            ("location.longitude", coord.longitude.to_string()),
            ("days", days.to_string()),
        ];
        if let Some(lang) = &self.config.language_code {
            query.push(("languageCode", lang.clone()));
        }

        self.http.get(url).query(&query)
    }
}

async fn send_lookup(request: reqwest::RequestBuilder, api_key: &str) -> FetchResult {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, api_key))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = redact(&truncate(&body, MAX_ERROR_BODY_CHARS), api_key);
        tracing::warn!(status = status.as_u16(), "Forecast request failed");
        return Err(FetchError {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        });
    }

    let payload: Value = response.json().await.map_err(|e| FetchError {
        status: status.as_u16(),
        message: redact(&format!("invalid JSON body: {}", e.without_url()), api_key),
    })?;

    tracing::debug!(status = status.as_u16(), "Forecast response received");
    Ok(Arc::new(payload))
}

fn transport_error(err: reqwest::Error, api_key: &str) -> FetchError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    // The request URL carries the key in its query string.
    let detail = redact(&err.without_url().to_string(), api_key);
    tracing::warn!(kind, "Forecast transport error");
    FetchError::transport(format!("{}: {}", kind, detail))
}

/// Replace every occurrence of the credential.
pub(crate) fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, REDACTED)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "test-pollen-key-123";

    fn client_for(server: &MockServer) -> ForecastClient {
        ForecastClient::new(ForecastClientConfig::new(TEST_KEY).with_base_url(server.uri())).unwrap()
    }

    fn coord() -> Coordinate {
        Coordinate::new(32.32, 35.32).unwrap()
    }

    fn body() -> Value {
        serde_json::json!({
            "dailyInfo": [{ "date": { "year": 2026, "month": 4, "day": 12 } }]
        })
    }

    #[tokio::test]
    async fn test_fetch_sends_query_parameters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .and(query_param("key", TEST_KEY))
            .and(query_param("location.latitude", "32.32"))
            .and(query_param("location.longitude", "35.32"))
            .and(query_param("days", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let payload = client.fetch_forecast(coord(), 1).await.unwrap();

        assert_eq!(payload["dailyInfo"][0]["date"]["day"], 12);
        assert_eq!(client.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_sends_language_code_when_configured() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .and(query_param("languageCode", "he"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ForecastClient::new(
            ForecastClientConfig::new(TEST_KEY)
                .with_base_url(mock_server.uri())
                .with_language_code(Some("he".to_string())),
        )
        .unwrap();

        assert!(client.fetch_forecast(coord(), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_error_maps_status_and_redacts_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .respond_with(ResponseTemplate::new(403).set_body_string(format!(
                "{{\"error\": {{\"message\": \"API key {} not valid\"}}}}",
                TEST_KEY
            )))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client.fetch_forecast(coord(), 1).await.unwrap_err();

        assert_eq!(err.status, 403);
        assert!(!err.message.contains(TEST_KEY));
        assert!(err.message.contains(REDACTED));
        assert!(!err.to_string().contains(TEST_KEY));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client.fetch_forecast(coord(), 1).await.unwrap_err();
        assert_eq!(err.status, 503);
    }

    #[tokio::test]
    async fn test_transport_error_hides_key() {
        // Nothing listens on port 1.
        let client = ForecastClient::new(
            ForecastClientConfig::new(TEST_KEY).with_base_url("http://127.0.0.1:1"),
        )
        .unwrap();

        let err = client.fetch_forecast(coord(), 1).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!err.message.contains(TEST_KEY));
    }

    #[tokio::test]
    async fn test_zero_days_rejected_without_network() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client.fetch_forecast(coord(), 0).await.unwrap_err();
        assert_eq!(err.status, 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let (a, b) = tokio::join!(
            client.fetch_forecast(coord(), 1),
            client.fetch_forecast(coord(), 1)
        );

        assert_eq!(a.unwrap(), b.unwrap());

        let stats = client.in_flight.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.coalesced_requests, 1);
        assert_eq!(stats.new_requests, 1);
    }

    #[tokio::test]
    async fn test_distinct_coordinates_fetch_independently() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let other = Coordinate::new(47.6062, -122.3321).unwrap();
        let (a, b) = tokio::join!(
            client.fetch_forecast(coord(), 1),
            client.fetch_forecast(other, 1)
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_sequential_requests_are_not_cached() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast:lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        client.fetch_forecast(coord(), 1).await.unwrap();
        client.fetch_forecast(coord(), 1).await.unwrap();
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = ForecastClientConfig::new(TEST_KEY);
        assert!(!format!("{:?}", config).contains(TEST_KEY));
    }

    #[test]
    fn test_redact_and_truncate() {
        assert_eq!(redact("key=abc&x=abc", "abc"), "key=REDACTED&x=REDACTED");
        assert_eq!(redact("nothing", ""), "nothing");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("  ab  ", 3), "ab");
    }
}
