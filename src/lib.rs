//! Sushi delivery API
//!
//! Delivery fee and ETA quoting for a single London restaurant, served over
//! HTTP and usable in-process by checkout clients.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod services;
pub mod tracing;

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::delivery::QuoteEngine;
use crate::errors::{ApiError, ServiceError};
use crate::services::CheckoutService;

#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub quotes: Arc<QuoteEngine>,
    pub checkout: CheckoutService,
}

impl AppState {
    pub fn new(config: config::AppConfig, quotes: QuoteEngine) -> Self {
        let quotes = Arc::new(quotes);
        Self {
            config,
            checkout: CheckoutService::new(quotes.clone()),
            quotes,
        }
    }

    /// State built from configuration, attaching providers when a key is set.
    pub fn from_config(config: config::AppConfig) -> Result<Self, ServiceError> {
        let quotes = delivery::build_quote_engine(&config.delivery)?;
        Ok(Self::new(config, quotes))
    }
}

/// Builds the CORS layer from config. Explicit origins win; otherwise
/// permissive CORS is only allowed in development or when opted in.
pub fn cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, ServiceError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        Ok(CorsLayer::permissive())
    } else {
        Err(ServiceError::ConfigurationError(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".to_string(),
        ))
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}

/// Routes without the outer CORS layer.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::liveness_check))
        .nest("/api/delivery", handlers::delivery::delivery_routes())
        .nest("/api/checkout", handlers::checkout::checkout_routes())
        .fallback(not_found)
}

/// The full application router with the middleware stack applied.
pub fn app_router(state: AppState) -> Result<Router, ServiceError> {
    let cors = cors_layer(&state.config)?;
    let timeout = state.config.http_timeout();

    Ok(api_routes()
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state))
}
