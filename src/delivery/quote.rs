use std::sync::Arc;

use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::distance::{haversine_km, straight_line_minutes, Coordinate};
use super::geocoder::Geocoder;
use super::routing::RouteProvider;
use super::zone::{self, Zone, ZoneRate, ZoneTable};

pub const DEFAULT_ORIGIN_ADDRESS: &str = "10 Piccadilly, London W1J 0DB";
pub const DEFAULT_ORIGIN: Coordinate = Coordinate::new(-0.1386, 51.5101);
pub const DEFAULT_MAX_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_COOKING_MINUTES: u32 = 20;
pub const DEFAULT_FALLBACK_SPEED_KMH: f64 = 30.0;

/// Distance-based price used when a driving route is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistancePricing {
    pub base_fee: Decimal,
    pub per_km: Decimal,
}

impl Default for DistancePricing {
    fn default() -> Self {
        Self {
            base_fee: dec!(3.5),
            per_km: dec!(0.8),
        }
    }
}

impl DistancePricing {
    /// `max(base, round(base + km * per_km))`, halves rounding up.
    pub fn price(&self, distance_km: f64) -> Decimal {
        let km = Decimal::from_f64_retain(distance_km).unwrap_or(Decimal::ZERO);
        let dynamic = (self.base_fee + km * self.per_km)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        dynamic.max(self.base_fee)
    }
}

/// Fixed inputs of the engine. Injected so alternate tables can be tested.
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    pub origin_address: String,
    pub origin: Coordinate,
    pub max_radius_km: f64,
    pub cooking_minutes: u32,
    pub fallback_speed_kmh: f64,
    pub pricing: DistancePricing,
    pub zones: ZoneTable,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            origin_address: DEFAULT_ORIGIN_ADDRESS.to_string(),
            origin: DEFAULT_ORIGIN,
            max_radius_km: DEFAULT_MAX_RADIUS_KM,
            cooking_minutes: DEFAULT_COOKING_MINUTES,
            fallback_speed_kmh: DEFAULT_FALLBACK_SPEED_KMH,
            pricing: DistancePricing::default(),
            zones: ZoneTable::london(),
        }
    }
}

/// Which data produced the quote, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateTier {
    Zone,
    StraightLine,
    Route,
}

impl EstimateTier {
    pub fn as_str(self) -> &'static str {
        match self {
            EstimateTier::Zone => "zone",
            EstimateTier::StraightLine => "straight_line",
            EstimateTier::Route => "route",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub zone: Zone,
    pub tier: EstimateTier,
    pub distance_km: Option<f64>,
    pub travel_minutes: Option<u32>,
    pub cooking_minutes: u32,
    pub total_duration_minutes: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub origin_address: String,
    pub destination_address: String,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DeliveryRejection {
    #[error("Sorry, we do not deliver to this address. Please enter a different address.")]
    OutsideServiceArea,
    #[error("Sorry, we don't deliver beyond {max_km} km. Your distance: {distance_km:.1} km.")]
    BeyondRadius { max_km: f64, distance_km: f64 },
    #[error(
        "Sorry, we don't deliver beyond {max_km} km. Your route distance: {distance_km:.1} km."
    )]
    BeyondRouteRadius { max_km: f64, distance_km: f64 },
}

impl DeliveryRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryRejection::OutsideServiceArea => "outside_service_area",
            DeliveryRejection::BeyondRadius { .. } => "beyond_radius",
            DeliveryRejection::BeyondRouteRadius { .. } => "beyond_route_radius",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("{0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Rejected(#[from] DeliveryRejection),
}

/// Wire shape of a successful quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub from: String,
    pub to: String,
    pub distance_km: Option<String>,
    pub duration_min: u32,
    pub travel_min: Option<u32>,
    pub cooking_min: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
}

impl From<&Quote> for QuoteResponse {
    fn from(quote: &Quote) -> Self {
        Self {
            from: quote.origin_address.clone(),
            to: quote.destination_address.clone(),
            // A zero distance is reported as unknown, like a zone-only quote.
            distance_km: quote
                .distance_km
                .filter(|km| *km != 0.0)
                .map(|km| format!("{:.2}", km)),
            duration_min: quote.total_duration_minutes,
            travel_min: quote.travel_minutes,
            cooking_min: quote.cooking_minutes,
            cost: quote.cost,
        }
    }
}

/// A refinement over the zone baseline.
#[derive(Debug, Clone, Copy)]
struct Leg {
    tier: EstimateTier,
    distance_km: f64,
    travel_minutes: u32,
    /// Only routed legs reprice; straight-line legs keep the zone cost.
    cost: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
enum DistanceBasis {
    StraightLine,
    Route,
}

/// Produces delivery quotes, degrading from routed to straight-line to
/// zone-only estimates as providers become unavailable.
pub struct QuoteEngine {
    settings: QuoteSettings,
    geocoder: Option<Arc<dyn Geocoder>>,
    route_provider: Option<Arc<dyn RouteProvider>>,
}

impl QuoteEngine {
    /// An engine with no providers quotes from the zone table only.
    pub fn new(settings: QuoteSettings) -> Self {
        Self {
            settings,
            geocoder: None,
            route_provider: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_route_provider(mut self, route_provider: Arc<dyn RouteProvider>) -> Self {
        self.route_provider = Some(route_provider);
        self
    }

    pub fn settings(&self) -> &QuoteSettings {
        &self.settings
    }

    pub fn has_geocoder(&self) -> bool {
        self.geocoder.is_some()
    }

    pub fn has_route_provider(&self) -> bool {
        self.route_provider.is_some()
    }

    #[instrument(skip(self), fields(zone, tier))]
    pub async fn quote(&self, customer_address: &str) -> Result<Quote, QuoteError> {
        let address = customer_address.trim();
        if address.is_empty() {
            return Err(QuoteError::InvalidAddress(
                "Customer address is required".to_string(),
            ));
        }

        let zone = zone::classify(address);
        tracing::Span::current().record("zone", tracing::field::display(zone));
        let rate = self
            .settings
            .zones
            .serviceable_rate(zone)
            .ok_or_else(|| self.rejected(DeliveryRejection::OutsideServiceArea))?;

        let baseline = self.zone_baseline(zone, rate, address);

        let Some(destination) = self.locate(address).await else {
            return Ok(self.finish(baseline));
        };

        let straight_km = haversine_km(self.settings.origin, destination);
        debug!(distance_km = straight_km, "straight-line distance");
        self.ensure_within_radius(straight_km, DistanceBasis::StraightLine)?;

        let leg = match self.routed_leg(destination).await {
            Some(leg) => {
                self.ensure_within_radius(leg.distance_km, DistanceBasis::Route)?;
                leg
            }
            None => self.straight_line_leg(straight_km),
        };

        Ok(self.finish(self.refine(baseline, rate, leg)))
    }

    fn zone_baseline(&self, zone: Zone, rate: ZoneRate, address: &str) -> Quote {
        Quote {
            zone,
            tier: EstimateTier::Zone,
            distance_km: None,
            travel_minutes: None,
            cooking_minutes: self.settings.cooking_minutes,
            total_duration_minutes: rate.time_minutes + self.settings.cooking_minutes,
            cost: rate.cost,
            origin_address: self.settings.origin_address.clone(),
            destination_address: address.to_string(),
        }
    }

    async fn locate(&self, address: &str) -> Option<Coordinate> {
        let Some(geocoder) = self.geocoder.as_ref() else {
            debug!("no geocoder configured, quoting from zone table");
            return None;
        };

        let coordinate = geocoder.geocode(address).await;
        if coordinate.is_none() {
            warn!(address, "geocoding failed, quoting from zone table");
        }
        coordinate
    }

    async fn routed_leg(&self, destination: Coordinate) -> Option<Leg> {
        let route = self
            .route_provider
            .as_ref()?
            .driving_route(self.settings.origin, destination)
            .await?;

        let distance_km = route.distance_meters / 1000.0;
        Some(Leg {
            tier: EstimateTier::Route,
            distance_km,
            travel_minutes: (route.duration_seconds / 60.0).ceil().max(0.0) as u32,
            cost: Some(self.settings.pricing.price(distance_km)),
        })
    }

    fn straight_line_leg(&self, distance_km: f64) -> Leg {
        Leg {
            tier: EstimateTier::StraightLine,
            distance_km,
            travel_minutes: straight_line_minutes(distance_km, self.settings.fallback_speed_kmh),
            cost: None,
        }
    }

    /// Applies a leg on top of the zone baseline. Neither cost nor total
    /// duration may drop below the zone's values.
    fn refine(&self, mut quote: Quote, rate: ZoneRate, leg: Leg) -> Quote {
        let floor_minutes = rate.time_minutes + self.settings.cooking_minutes;
        quote.tier = leg.tier;
        quote.distance_km = Some(leg.distance_km);
        quote.travel_minutes = Some(leg.travel_minutes);
        quote.total_duration_minutes =
            (leg.travel_minutes + self.settings.cooking_minutes).max(floor_minutes);
        if let Some(cost) = leg.cost {
            quote.cost = cost.max(rate.cost);
        }
        quote
    }

    fn ensure_within_radius(&self, distance_km: f64, basis: DistanceBasis) -> Result<(), QuoteError> {
        if distance_km <= self.settings.max_radius_km {
            return Ok(());
        }
        let max_km = self.settings.max_radius_km;
        let rejection = match basis {
            DistanceBasis::StraightLine => DeliveryRejection::BeyondRadius {
                max_km,
                distance_km,
            },
            DistanceBasis::Route => DeliveryRejection::BeyondRouteRadius {
                max_km,
                distance_km,
            },
        };
        Err(self.rejected(rejection).into())
    }

    fn rejected(&self, rejection: DeliveryRejection) -> DeliveryRejection {
        info!(reason = rejection.reason(), "delivery rejected");
        counter!("delivery_rejections_total", 1, "reason" => rejection.reason());
        rejection
    }

    fn finish(&self, quote: Quote) -> Quote {
        tracing::Span::current().record("tier", quote.tier.as_str());
        counter!("delivery_quotes_total", 1, "tier" => quote.tier.as_str());
        info!(
            zone = %quote.zone,
            tier = quote.tier.as_str(),
            cost = %quote.cost,
            total_minutes = quote.total_duration_minutes,
            "delivery quoted"
        );
        quote
    }
}
