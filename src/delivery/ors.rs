use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::errors::ServiceError;

pub const DEFAULT_ORS_BASE_URL: &str = "https://api.openrouteservice.org";

/// Connection settings for OpenRouteService.
#[derive(Debug, Clone)]
pub struct OrsSettings {
    pub base_url: String,
    /// Absent keys are a supported state: every lookup then returns nothing.
    pub api_key: Option<String>,
    /// Appended to free-text addresses before geocoding, e.g. "London, UK".
    pub region_suffix: String,
    /// ISO country filter for geocoding candidates.
    pub country: String,
    pub timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for OrsSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ORS_BASE_URL.to_string(),
            api_key: None,
            region_suffix: "London, UK".to_string(),
            country: "GB".to_string(),
            timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// HTTP client shared by the geocoding and directions lookups.
#[derive(Debug)]
pub struct OrsClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    api_key: Option<String>,
    pub(crate) region_suffix: String,
    pub(crate) country: String,
    pub(crate) geocode_breaker: CircuitBreaker,
    pub(crate) directions_breaker: CircuitBreaker,
}

impl OrsClient {
    pub fn new(settings: OrsSettings) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                ServiceError::ConfigurationError(format!(
                    "failed to construct HTTP client for OpenRouteService: {}",
                    e
                ))
            })?;

        Ok(Self::with_client(settings, http))
    }

    /// Build from an existing client (useful for testing).
    pub fn with_client(settings: OrsSettings, http: Client) -> Self {
        let api_key = settings.api_key.filter(|key| !key.trim().is_empty());
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            region_suffix: settings.region_suffix,
            country: settings.country,
            geocode_breaker: CircuitBreaker::new("ors-geocode", settings.breaker.clone()),
            directions_breaker: CircuitBreaker::new("ors-directions", settings.breaker),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Sends one request through `breaker`. Every failure yields `None`, but
    /// only transport errors, timeouts and 5xx statuses count against the
    /// breaker. A 4xx is the provider's answer for this address and leaves
    /// other customers' lookups untouched.
    pub(crate) async fn execute(
        &self,
        breaker: &CircuitBreaker,
        request: RequestBuilder,
    ) -> Option<Response> {
        if !breaker.allow_request() {
            debug!(provider = breaker.name(), "circuit open, skipping provider call");
            return None;
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                breaker.record_failure();
                if err.is_timeout() {
                    warn!(provider = breaker.name(), "provider call timed out");
                } else {
                    warn!(provider = breaker.name(), error = %err, "provider call failed");
                }
                return None;
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure();
            warn!(provider = breaker.name(), %status, "provider returned server error");
            return None;
        }
        breaker.record_success();
        if !status.is_success() {
            warn!(provider = breaker.name(), %status, "provider rejected request");
            return None;
        }

        Some(response)
    }
}
