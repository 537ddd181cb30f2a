use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::delivery::{
    DistancePricing, OrsSettings, QuoteSettings, ZoneRate, ZoneTable, DEFAULT_ORIGIN,
    DEFAULT_ORIGIN_ADDRESS,
};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 3000;
const CONFIG_DIR: &str = "config";
const MIN_DEBOUNCE_MS: u64 = 300;

/// Delivery quoting and OpenRouteService settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// OpenRouteService API key. Without one, quotes come from the zone table.
    #[serde(default)]
    pub ors_api_key: Option<String>,

    #[serde(default = "default_ors_base_url")]
    pub ors_base_url: String,

    /// Appended to customer addresses before geocoding
    #[serde(default = "default_region_suffix")]
    pub region_suffix: String,

    #[serde(default = "default_country")]
    pub country: String,

    /// Per-request timeout for provider calls (seconds)
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_breaker_failures")]
    #[validate(range(min = 1))]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_reset_secs")]
    #[validate(range(min = 1))]
    pub breaker_reset_secs: u64,

    /// Geocode cache; 0 disables it
    #[serde(default = "default_geocode_cache_ttl_secs")]
    pub geocode_cache_ttl_secs: u64,

    #[serde(default = "default_geocode_cache_capacity")]
    pub geocode_cache_capacity: usize,

    #[serde(default = "default_origin_address")]
    pub origin_address: String,

    #[serde(default = "default_origin_longitude")]
    pub origin_longitude: f64,

    #[serde(default = "default_origin_latitude")]
    pub origin_latitude: f64,

    #[serde(default = "default_max_radius_km")]
    pub max_radius_km: f64,

    #[serde(default = "default_cooking_minutes")]
    pub cooking_minutes: u32,

    #[serde(default = "default_fallback_speed_kmh")]
    pub fallback_speed_kmh: f64,

    #[serde(default = "default_base_fee")]
    pub base_fee: Decimal,

    #[serde(default = "default_per_km_fee")]
    pub per_km_fee: Decimal,

    /// Replaces the built-in London table when set. Must name every zone.
    #[serde(default)]
    pub zones: Option<BTreeMap<String, ZoneRate>>,

    /// Checkout debounce window (milliseconds)
    #[serde(default = "default_debounce_ms")]
    #[validate(range(min = 300))]
    pub client_debounce_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ors_api_key: None,
            ors_base_url: default_ors_base_url(),
            region_suffix: default_region_suffix(),
            country: default_country(),
            request_timeout_secs: default_request_timeout_secs(),
            breaker_failure_threshold: default_breaker_failures(),
            breaker_reset_secs: default_breaker_reset_secs(),
            geocode_cache_ttl_secs: default_geocode_cache_ttl_secs(),
            geocode_cache_capacity: default_geocode_cache_capacity(),
            origin_address: default_origin_address(),
            origin_longitude: default_origin_longitude(),
            origin_latitude: default_origin_latitude(),
            max_radius_km: default_max_radius_km(),
            cooking_minutes: default_cooking_minutes(),
            fallback_speed_kmh: default_fallback_speed_kmh(),
            base_fee: default_base_fee(),
            per_km_fee: default_per_km_fee(),
            zones: None,
            client_debounce_ms: default_debounce_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn zone_table(&self) -> Result<ZoneTable, ValidationError> {
        let Some(zones) = &self.zones else {
            return Ok(ZoneTable::london());
        };
        ZoneTable::from_named(zones.iter().map(|(name, rate)| (name.as_str(), *rate))).map_err(
            |e| {
                let mut err = ValidationError::new("zones");
                err.message = Some(e.to_string().into());
                err
            },
        )
    }

    pub fn quote_settings(&self) -> Result<QuoteSettings, ValidationError> {
        Ok(QuoteSettings {
            origin_address: self.origin_address.clone(),
            origin: crate::delivery::Coordinate::new(self.origin_longitude, self.origin_latitude),
            max_radius_km: self.max_radius_km,
            cooking_minutes: self.cooking_minutes,
            fallback_speed_kmh: self.fallback_speed_kmh,
            pricing: DistancePricing {
                base_fee: self.base_fee,
                per_km: self.per_km_fee,
            },
            zones: self.zone_table()?,
        })
    }

    pub fn ors_settings(&self) -> OrsSettings {
        OrsSettings {
            base_url: self.ors_base_url.clone(),
            api_key: self.ors_api_key.clone(),
            region_suffix: self.region_suffix.clone(),
            country: self.country.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                reset_timeout: Duration::from_secs(self.breaker_reset_secs),
                success_threshold: 1,
            },
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.ors_api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn geocode_cache_ttl(&self) -> Option<Duration> {
        (self.geocode_cache_ttl_secs > 0 && self.geocode_cache_capacity > 0)
            .then(|| Duration::from_secs(self.geocode_cache_ttl_secs))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.client_debounce_ms.max(MIN_DEBOUNCE_MS))
    }

    /// Checks the derive attributes cannot express: coordinate ranges,
    /// strictly positive limits and zone table completeness.
    fn validate_settings(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = self.zone_table() {
            errors.add("zones", err);
        }
        if let Err(err) = validate_longitude(self.origin_longitude) {
            errors.add("origin_longitude", err);
        }
        if let Err(err) = validate_latitude(self.origin_latitude) {
            errors.add("origin_latitude", err);
        }
        if let Err(err) = validate_positive(self.max_radius_km) {
            errors.add("max_radius_km", err);
        }
        if let Err(err) = validate_positive(self.fallback_speed_kmh) {
            errors.add("fallback_speed_kmh", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Export spans over OTLP (also enabled by OTEL_EXPORTER_OTLP_ENDPOINT)
    #[serde(default)]
    pub otel_enabled: bool,

    /// Whole-request timeout applied by the router (seconds)
    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1))]
    pub http_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    #[validate]
    pub delivery: DeliveryConfig,
}

impl AppConfig {
    pub fn new(host: String, port: u16, environment: String) -> Self {
        Self {
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            otel_enabled: false,
            http_timeout_secs: default_http_timeout_secs(),
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            delivery: DeliveryConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Runs derive-based validation plus the cross-field checks.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.delivery.validate_settings()?;
        self.validate_additional_constraints()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_ors_base_url() -> String {
    crate::delivery::DEFAULT_ORS_BASE_URL.to_string()
}

fn default_region_suffix() -> String {
    "London, UK".to_string()
}

fn default_country() -> String {
    "GB".to_string()
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_breaker_failures() -> u32 {
    5
}

fn default_breaker_reset_secs() -> u64 {
    60
}

fn default_geocode_cache_ttl_secs() -> u64 {
    3600
}

fn default_geocode_cache_capacity() -> usize {
    1000
}

fn default_origin_address() -> String {
    DEFAULT_ORIGIN_ADDRESS.to_string()
}

fn default_origin_longitude() -> f64 {
    DEFAULT_ORIGIN.longitude
}

fn default_origin_latitude() -> f64 {
    DEFAULT_ORIGIN.latitude
}

fn default_max_radius_km() -> f64 {
    crate::delivery::DEFAULT_MAX_RADIUS_KM
}

fn default_cooking_minutes() -> u32 {
    crate::delivery::DEFAULT_COOKING_MINUTES
}

fn default_fallback_speed_kmh() -> f64 {
    crate::delivery::DEFAULT_FALLBACK_SPEED_KMH
}

fn default_base_fee() -> Decimal {
    DistancePricing::default().base_fee
}

fn default_per_km_fee() -> Decimal {
    DistancePricing::default().per_km
}

fn default_debounce_ms() -> u64 {
    800
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_positive(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("positive");
        err.message = Some("must be a finite value greater than 0".into());
        Err(err)
    }
}

fn validate_longitude(value: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&value) {
        return Ok(());
    }
    let mut err = ValidationError::new("origin_longitude");
    err.message = Some("must be between -180 and 180".into());
    Err(err)
}

fn validate_latitude(value: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&value) {
        return Ok(());
    }
    let mut err = ValidationError::new("origin_latitude");
    err.message = Some("must be between -90 and 90".into());
    Err(err)
}

fn otel_requested(config_flag: bool) -> bool {
    config_flag
        || env::var("APP__OTEL_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        || env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool, otel: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("sushi_delivery_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if otel_requested(otel) {
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::{trace as sdktrace, Resource};

        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let service_name =
            env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "sushi-delivery-api".to_string());

        let resource = Resource::new(vec![KeyValue::new("service.name", service_name)]);
        let tracer = match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(sdktrace::config().with_resource(resource))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => tracer,
            Err(err) => {
                eprintln!("Failed to install OTLP pipeline: {}", err);
                init_plain(&filter_directive, json);
                return;
            }
        };

        let base = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(EnvFilter::new(filter_directive));

        if json {
            let _ = base.with(fmt::layer().json()).try_init();
        } else {
            let _ = base.with(fmt::layer()).try_init();
        }
    } else {
        init_plain(&filter_directive, json);
    }
}

fn init_plain(filter_directive: &str, json: bool) {
    use tracing_subscriber::fmt;

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        ors_configured = app_config.delivery.has_api_key(),
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
