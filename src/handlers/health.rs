use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::AppState;

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub geocoding: bool,
    pub routing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    /// Without providers every quote comes from the zone table.
    pub providers: ProviderStatus,
}

/// Liveness probe. Provider availability never makes the service unhealthy.
pub async fn liveness_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        providers: ProviderStatus {
            geocoding: state.quotes.has_geocoder(),
            routing: state.quotes.has_route_provider(),
        },
    })
}
