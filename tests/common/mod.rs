#![allow(dead_code)]

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use sushi_delivery_api::{app_router, config::AppConfig, AppState};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_ORS_KEY: &str = "test-ors-key";

/// Router plus state wired the same way the server binary does it.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    /// No provider key: every quote comes from the zone table.
    pub fn zone_only() -> Self {
        Self::from_config(test_config())
    }

    /// Providers pointed at a mock OpenRouteService.
    pub fn with_ors(base_url: &str) -> Self {
        let mut cfg = test_config();
        cfg.delivery.ors_api_key = Some(TEST_ORS_KEY.to_string());
        cfg.delivery.ors_base_url = base_url.to_string();
        cfg.delivery.request_timeout_secs = 1;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: AppConfig) -> Self {
        let state = AppState::from_config(cfg).expect("test state");
        let router = app_router(state.clone()).expect("test router");
        Self { router, state }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn calculate(&self, address: &str) -> Response {
        self.request(
            Method::POST,
            "/api/delivery/calculate",
            Some(json!({ "customerAddress": address })),
        )
        .await
    }
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("127.0.0.1".to_string(), 0, "test".to_string());
    cfg.cors_allow_any_origin = true;
    cfg
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn mount_geocode(server: &MockServer, longitude: f64, latitude: f64) {
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [{ "geometry": { "coordinates": [longitude, latitude] } }]
        })))
        .mount(server)
        .await;
}

pub async fn mount_route(server: &MockServer, distance_meters: f64, duration_seconds: f64) {
    Mock::given(method("POST"))
        .and(path("/v2/directions/driving-car"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "routes": [{ "summary": { "distance": distance_meters, "duration": duration_seconds } }]
        })))
        .mount(server)
        .await;
}

pub async fn mount_failure(server: &MockServer, http_method: &str, route: &str, status: u16) {
    Mock::given(method(http_method))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
