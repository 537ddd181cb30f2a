use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use super::distance::Coordinate;
use super::ors::OrsClient;

/// Driving route summary as reported by the routing provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Driving-route lookups. Same degrade-to-`None` policy as geocoding.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn driving_route(&self, from: Coordinate, to: Coordinate) -> Option<RouteSummary>;
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    summary: Summary,
}

// ORS omits zero-valued fields from the summary.
#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

#[async_trait]
impl RouteProvider for OrsClient {
    #[instrument(skip(self))]
    async fn driving_route(&self, from: Coordinate, to: Coordinate) -> Option<RouteSummary> {
        let api_key = self.api_key()?;

        let request = self
            .http
            .post(format!("{}/v2/directions/driving-car", self.base_url))
            .header("Authorization", api_key)
            .json(&json!({
                "coordinates": [from.to_lon_lat(), to.to_lon_lat()],
                "instructions": false,
                "preference": "recommended",
            }));

        let response = self.execute(&self.directions_breaker, request).await?;
        let body = match response.json::<DirectionsResponse>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to decode directions response");
                return None;
            }
        };

        let route = body.routes.into_iter().next().map(|route| RouteSummary {
            distance_meters: route.summary.distance,
            duration_seconds: route.summary.duration,
        });
        if route.is_none() {
            warn!("directions returned no routes");
        }
        route
    }
}

#[async_trait]
impl<R: RouteProvider + ?Sized> RouteProvider for Arc<R> {
    async fn driving_route(&self, from: Coordinate, to: Coordinate) -> Option<RouteSummary> {
        (**self).driving_route(from, to).await
    }
}
