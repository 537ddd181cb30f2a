use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::distance::Coordinate;
use super::ors::OrsClient;
use crate::cache::TtlCache;

/// Resolves free-text addresses to coordinates.
///
/// Implementations never fail past their own boundary: a missing credential,
/// provider error, timeout or empty result all come back as `None`.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Option<Coordinate>;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: [f64; 2],
}

#[async_trait]
impl Geocoder for OrsClient {
    #[instrument(skip(self))]
    async fn geocode(&self, address: &str) -> Option<Coordinate> {
        let Some(api_key) = self.api_key() else {
            warn!("geocoding skipped: no OpenRouteService API key configured");
            return None;
        };

        let text = format!("{}, {}", address, self.region_suffix);
        let request = self
            .http
            .get(format!("{}/geocode/search", self.base_url))
            .query(&[
                ("api_key", api_key),
                ("text", text.as_str()),
                ("boundary.country", self.country.as_str()),
                ("size", "1"),
            ]);

        let response = self.execute(&self.geocode_breaker, request).await?;
        let body = match response.json::<GeocodeResponse>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to decode geocoding response");
                return None;
            }
        };

        let coordinate = body
            .features
            .into_iter()
            .next()
            .map(|feature| Coordinate::from(feature.geometry.coordinates));
        if coordinate.is_none() {
            warn!("geocoding returned no candidates");
        }
        coordinate
    }
}

/// Canonical cache key: trimmed, single-spaced, upper-cased.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// Caches successful lookups of an inner geocoder. Misses, including
/// negative results, go straight to the inner geocoder.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: TtlCache<String, Coordinate>,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl, capacity),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn geocode(&self, address: &str) -> Option<Coordinate> {
        let key = normalize_address(address);
        if let Some(hit) = self.cache.get(&key) {
            debug!(address = %key, "geocode cache hit");
            return Some(hit);
        }

        let resolved = self.inner.geocode(address).await?;
        self.cache.insert(key, resolved);
        Some(resolved)
    }
}

#[async_trait]
impl<G: Geocoder + ?Sized> Geocoder for Arc<G> {
    async fn geocode(&self, address: &str) -> Option<Coordinate> {
        (**self).geocode(address).await
    }
}
