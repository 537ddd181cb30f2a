//! Delivery fee and ETA quoting.
//!
//! The [`QuoteEngine`] answers from the zone table alone and refines with
//! straight-line or routed distances when OpenRouteService is configured.

pub mod client;
pub mod distance;
pub mod geocoder;
pub mod ors;
pub mod quote;
pub mod routing;
pub mod zone;

use std::sync::Arc;

use tracing::{info, warn};

pub use client::{
    ClientEstimator, DebouncedEstimator, EstimateState, HttpQuoteSource, LocalEstimate,
    QuoteSource, SourceError, DEFAULT_DEBOUNCE,
};
pub use distance::{haversine_km, straight_line_minutes, Coordinate};
pub use geocoder::{CachedGeocoder, Geocoder};
pub use ors::{OrsClient, OrsSettings, DEFAULT_ORS_BASE_URL};
pub use quote::{
    DeliveryRejection, DistancePricing, EstimateTier, Quote, QuoteEngine, QuoteError,
    QuoteResponse, QuoteSettings, DEFAULT_COOKING_MINUTES, DEFAULT_FALLBACK_SPEED_KMH,
    DEFAULT_MAX_RADIUS_KM, DEFAULT_ORIGIN, DEFAULT_ORIGIN_ADDRESS,
};
pub use routing::{RouteProvider, RouteSummary};
pub use zone::{classify, extract_postcode, Zone, ZoneRate, ZoneTable, ZoneTableError};

use crate::config::DeliveryConfig;
use crate::errors::ServiceError;

/// Builds the engine described by `config`. Providers are attached only when
/// an API key is configured.
pub fn build_quote_engine(config: &DeliveryConfig) -> Result<QuoteEngine, ServiceError> {
    let settings = config
        .quote_settings()
        .map_err(|e| ServiceError::ConfigurationError(e.to_string()))?;
    let engine = QuoteEngine::new(settings);

    if !config.has_api_key() {
        warn!("no OpenRouteService API key configured; quoting from the zone table only");
        return Ok(engine);
    }

    let ors = Arc::new(OrsClient::new(config.ors_settings())?);
    let geocoder: Arc<dyn Geocoder> = match config.geocode_cache_ttl() {
        Some(ttl) => Arc::new(CachedGeocoder::new(
            ors.clone(),
            ttl,
            config.geocode_cache_capacity,
        )),
        None => ors.clone(),
    };

    info!(base_url = %config.ors_base_url, "OpenRouteService providers enabled");
    Ok(engine.with_geocoder(geocoder).with_route_provider(ors))
}
