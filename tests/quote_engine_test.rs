mod common;

use rust_decimal_macros::dec;
use serde_json::json;
use sushi_delivery_api::config::DeliveryConfig;
use sushi_delivery_api::delivery::{build_quote_engine, EstimateTier, QuoteEngine, Zone};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{mount_failure, mount_route, TEST_ORS_KEY};

fn engine_for(server: &MockServer, tweak: impl FnOnce(&mut DeliveryConfig)) -> QuoteEngine {
    let mut config = DeliveryConfig {
        ors_api_key: Some(TEST_ORS_KEY.to_string()),
        ors_base_url: server.uri(),
        request_timeout_secs: 1,
        ..DeliveryConfig::default()
    };
    tweak(&mut config);
    build_quote_engine(&config).expect("engine")
}

fn geocode_body(longitude: f64, latitude: f64) -> serde_json::Value {
    json!({ "features": [{ "geometry": { "coordinates": [longitude, latitude] } }] })
}

#[tokio::test]
async fn geocode_request_is_scoped_to_region() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .and(query_param("api_key", TEST_ORS_KEY))
        .and(query_param("text", "SW1A 1AA, London, UK"))
        .and(query_param("boundary.country", "GB"))
        .and(query_param("size", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5191)))
        .expect(1)
        .mount(&ors)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/directions/driving-car"))
        .and(header("authorization", TEST_ORS_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "routes": [{ "summary": { "distance": 1800.0, "duration": 420.0 } }]
        })))
        .expect(1)
        .mount(&ors)
        .await;

    let quote = engine_for(&ors, |_| {}).quote("SW1A 1AA").await.unwrap();

    assert_eq!(quote.zone, Zone::SW);
    assert_eq!(quote.tier, EstimateTier::Route);
    assert_eq!(quote.travel_minutes, Some(7));
    // 3.5 + 1.8 * 0.8 = 4.94 rounds to 5, above the SW floor of 4.
    assert_eq!(quote.cost, dec!(5));
    assert_eq!(quote.total_duration_minutes, 35);
}

#[tokio::test]
async fn repeated_addresses_reuse_cached_coordinates() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5191)))
        .expect(1)
        .mount(&ors)
        .await;
    mount_route(&ors, 2000.0, 600.0).await;
    let engine = engine_for(&ors, |_| {});

    let first = engine.quote("N1 9GU").await.unwrap();
    let second = engine.quote("  n1   9gu ").await.unwrap();

    assert_eq!(first.cost, second.cost);
    assert_eq!(first.distance_km, second.distance_km);
}

#[tokio::test]
async fn disabled_cache_geocodes_every_time() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5191)))
        .expect(2)
        .mount(&ors)
        .await;
    mount_route(&ors, 2000.0, 600.0).await;
    let engine = engine_for(&ors, |cfg| cfg.geocode_cache_ttl_secs = 0);

    engine.quote("N1 9GU").await.unwrap();
    engine.quote("N1 9GU").await.unwrap();
}

#[tokio::test]
async fn open_circuit_stops_calling_geocoder() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&ors)
        .await;
    let engine = engine_for(&ors, |cfg| cfg.breaker_failure_threshold = 2);

    for _ in 0..4 {
        let quote = engine.quote("E1 6AN").await.unwrap();
        assert_eq!(quote.tier, EstimateTier::Zone);
        assert_eq!(quote.cost, dec!(6));
        assert_eq!(quote.total_duration_minutes, 45);
    }
}

#[tokio::test]
async fn unserviceable_postcode_never_reaches_provider() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5191)))
        .expect(0)
        .mount(&ors)
        .await;
    let engine = engine_for(&ors, |_| {});

    let err = engine.quote("EC2A 4NE").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Sorry, we do not deliver to this address. Please enter a different address."
    );
}

#[tokio::test]
async fn failed_route_keeps_straight_line_tier() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        // Roughly 3 km north of the restaurant.
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5371)))
        .mount(&ors)
        .await;
    mount_failure(&ors, "POST", "/v2/directions/driving-car", 429).await;
    let engine = engine_for(&ors, |_| {});

    let quote = engine.quote("NW1 8NH").await.unwrap();
    assert_eq!(quote.tier, EstimateTier::StraightLine);
    assert_eq!(quote.travel_minutes, Some(7));
    assert_eq!(quote.cost, dec!(7));
    assert_eq!(quote.total_duration_minutes, 50);
}

#[tokio::test]
async fn unmatched_addresses_do_not_disable_radius_gate() {
    let ors = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        .and(query_param("text", "garbage SW1A 1AA, London, UK"))
        .respond_with(ResponseTemplate::new(400))
        .with_priority(1)
        .mount(&ors)
        .await;
    Mock::given(method("GET"))
        .and(path("/geocode/search"))
        // Roughly 6 km north of the restaurant.
        .respond_with(ResponseTemplate::new(200).set_body_json(geocode_body(-0.1386, 51.5641)))
        .mount(&ors)
        .await;
    let engine = engine_for(&ors, |cfg| cfg.breaker_failure_threshold = 2);

    for _ in 0..5 {
        let quote = engine.quote("garbage SW1A 1AA").await.unwrap();
        assert_eq!(quote.tier, EstimateTier::Zone);
    }

    let err = engine.quote("N1 9GU").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Sorry, we don't deliver beyond 5 km. Your distance: 6.0 km."
    );
}
