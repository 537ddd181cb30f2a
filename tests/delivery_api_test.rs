mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::MockServer;

use common::{mount_failure, mount_geocode, mount_route, response_json, TestApp};

// Roughly 1 km north of the restaurant.
const NEARBY: (f64, f64) = (-0.1386, 51.5191);
// Roughly 6 km north of the restaurant.
const FAR_AWAY: (f64, f64) = (-0.1386, 51.5641);

#[tokio::test]
async fn zone_only_quote_matches_wire_format() {
    let app = TestApp::zone_only();

    let response = app.calculate("SW1A 1AA").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(
        body,
        json!({
            "from": "10 Piccadilly, London W1J 0DB",
            "to": "SW1A 1AA",
            "distance_km": null,
            "duration_min": 35,
            "travel_min": null,
            "cooking_min": 20,
            "cost": 4.0
        })
    );
}

#[tokio::test]
async fn routed_quote_reprices_by_distance() {
    let ors = MockServer::start().await;
    mount_geocode(&ors, NEARBY.0, NEARBY.1).await;
    mount_route(&ors, 2000.0, 600.0).await;
    let app = TestApp::with_ors(&ors.uri());

    let body = response_json(app.calculate("SW1A 1AA").await).await;

    assert_eq!(body["distance_km"], "2.00");
    assert_eq!(body["travel_min"], 10);
    assert_eq!(body["duration_min"], 35);
    assert_eq!(body["cost"], 5.0);
}

#[tokio::test]
async fn unknown_postcode_is_rejected_with_message() {
    let app = TestApp::zone_only();

    let response = app.calculate("EC1A 1BB").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(
        body["error"],
        "Sorry, we do not deliver to this address. Please enter a different address."
    );
    assert_eq!(body["status"], 400);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn distant_address_is_rejected_before_routing() {
    let ors = MockServer::start().await;
    mount_geocode(&ors, FAR_AWAY.0, FAR_AWAY.1).await;
    mount_route(&ors, 3000.0, 300.0).await;
    let app = TestApp::with_ors(&ors.uri());

    let response = app.calculate("N1 9GU").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(
        body["error"],
        "Sorry, we don't deliver beyond 5 km. Your distance: 6.0 km."
    );
}

#[tokio::test]
async fn long_route_is_rejected() {
    let ors = MockServer::start().await;
    mount_geocode(&ors, NEARBY.0, NEARBY.1).await;
    mount_route(&ors, 5400.0, 900.0).await;
    let app = TestApp::with_ors(&ors.uri());

    let body = response_json(app.calculate("W1J 0DB").await).await;
    assert_eq!(
        body["error"],
        "Sorry, we don't deliver beyond 5 km. Your route distance: 5.4 km."
    );
}

#[tokio::test]
async fn provider_outage_degrades_to_zone_quote() {
    let ors = MockServer::start().await;
    mount_failure(&ors, "GET", "/geocode/search", 503).await;
    let app = TestApp::with_ors(&ors.uri());

    let response = app.calculate("NW3 2QG").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["cost"], 7.0);
    assert_eq!(body["duration_min"], 50);
    assert_eq!(body["distance_km"], serde_json::Value::Null);
}

#[tokio::test]
async fn routing_outage_uses_straight_line_estimate() {
    let ors = MockServer::start().await;
    mount_geocode(&ors, NEARBY.0, NEARBY.1).await;
    mount_failure(&ors, "POST", "/v2/directions/driving-car", 500).await;
    let app = TestApp::with_ors(&ors.uri());

    let body = response_json(app.calculate("E1 6AN").await).await;
    assert_eq!(body["distance_km"], "1.00");
    // ceil(1.0008 / 30 * 60) = 3 minutes, under the E floor; zone price kept.
    assert_eq!(body["travel_min"], 3);
    assert_eq!(body["duration_min"], 45);
    assert_eq!(body["cost"], 6.0);
}

#[tokio::test]
async fn missing_address_is_a_bad_request() {
    let app = TestApp::zone_only();

    for payload in [json!({}), json!({ "customerAddress": "   " })] {
        let response = app
            .request(Method::POST, "/api/delivery/calculate", Some(payload))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["error"], "Customer address is required");
    }
}

#[tokio::test]
async fn malformed_json_uses_error_shape() {
    let app = TestApp::zone_only();
    let response = app
        .router()
        .oneshot(
            axum::http::Request::builder()
                .method(Method::POST)
                .uri("/api/delivery/calculate")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::zone_only();
    let response = app
        .router()
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-me")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "trace-me");
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["providers"]["geocoding"], false);
}

#[tokio::test]
async fn checkout_summary_requotes_delivery() {
    let app = TestApp::zone_only();

    let response = app
        .request(
            Method::POST,
            "/api/checkout/summary",
            Some(json!({
                "customerAddress": "SE1 7PB",
                "items": [
                    { "name": "Dragon roll", "unit_price": 11.5, "quantity": 2 },
                    { "name": "Edamame", "unit_price": 4.0, "quantity": 1 }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;

    assert_eq!(body["subtotal"], 27.0);
    assert_eq!(body["delivery_fee"], 7.0);
    assert_eq!(body["total"], 34.0);
    assert_eq!(body["prep_minutes"], 20);
    assert_eq!(body["eta_minutes"], 50);
    assert_eq!(body["quote"]["to"], "SE1 7PB");
}

#[tokio::test]
async fn checkout_rejects_empty_cart() {
    let app = TestApp::zone_only();
    let response = app
        .request(
            Method::POST,
            "/api/checkout/summary",
            Some(json!({ "customerAddress": "SE1 7PB", "items": [] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_oversized_lines() {
    let app = TestApp::zone_only();
    let response = app
        .request(
            Method::POST,
            "/api/checkout/summary",
            Some(json!({
                "customerAddress": "SE1 7PB",
                "items": [{ "name": "Gold roll", "unit_price": 1e20, "quantity": 4_000_000_000u32 }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Gold roll"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::zone_only();
    let response = app.request(Method::GET, "/api/orders", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
