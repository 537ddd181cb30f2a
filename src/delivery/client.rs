//! Checkout-side estimation.
//!
//! [`ClientEstimator`] prices a postcode from the zone table alone, with no
//! network access. [`DebouncedEstimator`] drives one checkout input field: it
//! shows the local estimate straight away, waits for typing to settle, then
//! asks a [`QuoteSource`] for the authoritative quote and falls back to the
//! local estimate if that source cannot be reached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::quote::{
    DeliveryRejection, QuoteEngine, QuoteError, QuoteResponse, DEFAULT_COOKING_MINUTES,
};
use super::zone::{self, Zone, ZoneTable};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

/// Zone-table estimate computed without any provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalEstimate {
    pub zone: Zone,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub total_duration_minutes: u32,
}

/// Offline estimator sharing the engine's zone table and cooking time.
#[derive(Debug, Clone)]
pub struct ClientEstimator {
    zones: ZoneTable,
    cooking_minutes: u32,
}

impl ClientEstimator {
    pub fn new(zones: ZoneTable, cooking_minutes: u32) -> Self {
        Self {
            zones,
            cooking_minutes,
        }
    }

    /// Mirrors the engine's fixed inputs so both agree on the zone tier.
    pub fn for_engine(engine: &QuoteEngine) -> Self {
        let settings = engine.settings();
        Self::new(settings.zones.clone(), settings.cooking_minutes)
    }

    /// `None` when the postcode falls outside the serviceable area.
    pub fn estimate(&self, postcode: &str) -> Option<LocalEstimate> {
        let zone = zone::classify(postcode);
        self.zones
            .serviceable_rate(zone)
            .map(|rate| LocalEstimate {
                zone,
                cost: rate.cost,
                total_duration_minutes: rate.time_minutes + self.cooking_minutes,
            })
    }
}

impl Default for ClientEstimator {
    fn default() -> Self {
        Self::new(ZoneTable::london(), DEFAULT_COOKING_MINUTES)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The authoritative side answered and refused delivery.
    #[error("{0}")]
    Rejected(String),
    /// The authoritative side could not be reached or answered unexpectedly.
    #[error("quote source unreachable: {0}")]
    Unreachable(String),
}

/// Where authoritative quotes come from.
#[async_trait]
pub trait QuoteSource: Send + Sync + 'static {
    async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError>;
}

#[async_trait]
impl QuoteSource for QuoteEngine {
    async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError> {
        self.quote(address)
            .await
            .map(|quote| QuoteResponse::from(&quote))
            .map_err(|err: QuoteError| SourceError::Rejected(err.to_string()))
    }
}

#[async_trait]
impl<S: QuoteSource + ?Sized> QuoteSource for Arc<S> {
    async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError> {
        (**self).fetch_quote(address).await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Calls a running server's `/api/delivery/calculate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpQuoteSource {
    client: Client,
    endpoint: String,
}

impl HttpQuoteSource {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        Ok(Self::with_client(server_url, client))
    }

    pub fn with_client(server_url: &str, client: Client) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/api/delivery/calculate",
                server_url.trim_end_matches('/')
            ),
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "customerAddress": address }))
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return match response.json::<ErrorBody>().await {
                Ok(body) => Err(SourceError::Rejected(body.error)),
                Err(e) => Err(SourceError::Unreachable(format!(
                    "unreadable rejection body: {}",
                    e
                ))),
            };
        }
        if !status.is_success() {
            return Err(SourceError::Unreachable(format!("HTTP status {}", status)));
        }

        response
            .json::<QuoteResponse>()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))
    }
}

/// What the checkout should currently display for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum EstimateState {
    /// Nothing typed.
    Idle,
    /// Input does not yet look like a full postcode; no lookup is made.
    Incomplete,
    /// Local estimate shown while the authoritative lookup is pending.
    Provisional(LocalEstimate),
    /// Lookup pending and no local estimate is available.
    Checking,
    Confirmed(QuoteResponse),
    /// Authoritative source unreachable; showing the local estimate.
    Fallback(LocalEstimate),
    Unavailable(String),
}

impl EstimateState {
    /// Whether checkout may proceed with the displayed estimate.
    pub fn is_deliverable(&self) -> bool {
        matches!(
            self,
            EstimateState::Confirmed(_) | EstimateState::Fallback(_)
        )
    }
}

/// Same heuristic as the checkout form: a space and at least six characters.
pub fn looks_complete(postcode: &str) -> bool {
    postcode.contains(' ') && postcode.len() >= 6
}

/// Debounced, last-write-wins estimator for a single input field.
///
/// Each call to [`DebouncedEstimator::input`] aborts the pending lookup task
/// and starts a new one, so at most one lookup per field is in flight and a
/// slow answer for stale input is never published.
pub struct DebouncedEstimator<S: QuoteSource> {
    estimator: ClientEstimator,
    source: Arc<S>,
    window: Duration,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
    state: Arc<watch::Sender<EstimateState>>,
}

impl<S: QuoteSource> DebouncedEstimator<S> {
    pub fn new(estimator: ClientEstimator, source: Arc<S>, window: Duration) -> Self {
        let (state, _) = watch::channel(EstimateState::Idle);
        Self {
            estimator,
            source,
            window,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<EstimateState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> EstimateState {
        self.state.borrow().clone()
    }

    /// Handles a new value of the field. Must be called within a Tokio runtime.
    pub fn input(&self, raw: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_pending();

        let postcode = raw.trim().to_ascii_uppercase();
        if postcode.is_empty() {
            self.state.send_replace(EstimateState::Idle);
            return;
        }
        if !looks_complete(&postcode) {
            self.state.send_replace(EstimateState::Incomplete);
            return;
        }

        let local = self.estimator.estimate(&postcode);
        self.state.send_replace(match local {
            Some(estimate) => EstimateState::Provisional(estimate),
            None => EstimateState::Checking,
        });

        let task = tokio::spawn(lookup(
            LookupContext {
                source: self.source.clone(),
                state: self.state.clone(),
                generation: self.generation.clone(),
                window: self.window,
            },
            generation,
            postcode,
            local,
        ));
        *self.lock_pending() = Some(task);
    }

    fn cancel_pending(&self) {
        if let Some(task) = self.lock_pending().take() {
            task.abort();
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<S: QuoteSource> Drop for DebouncedEstimator<S> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

struct LookupContext<S: QuoteSource> {
    source: Arc<S>,
    state: Arc<watch::Sender<EstimateState>>,
    generation: Arc<AtomicU64>,
    window: Duration,
}

async fn lookup<S: QuoteSource>(
    ctx: LookupContext<S>,
    generation: u64,
    postcode: String,
    local: Option<LocalEstimate>,
) {
    tokio::time::sleep(ctx.window).await;
    if ctx.generation.load(Ordering::SeqCst) != generation {
        return;
    }

    debug!(%postcode, "requesting authoritative delivery quote");
    let next = match ctx.source.fetch_quote(&postcode).await {
        Ok(quote) => EstimateState::Confirmed(quote),
        Err(SourceError::Rejected(reason)) => EstimateState::Unavailable(reason),
        Err(SourceError::Unreachable(detail)) => {
            warn!(%detail, "quote source unreachable, using zone estimate");
            match local {
                Some(estimate) => EstimateState::Fallback(estimate),
                None => {
                    EstimateState::Unavailable(DeliveryRejection::OutsideServiceArea.to_string())
                }
            }
        }
    };

    publish_if_current(&ctx.state, &ctx.generation, generation, next);
}

/// Publishes `next` only while `generation` is still the latest input. The
/// check runs under the channel's write lock, so it cannot interleave with the
/// `send_replace` made by a newer [`DebouncedEstimator::input`].
fn publish_if_current(
    state: &watch::Sender<EstimateState>,
    latest: &AtomicU64,
    generation: u64,
    next: EstimateState,
) -> bool {
    state.send_if_modified(|current| {
        if latest.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = next;
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::quote::QuoteSettings;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingSource {
        calls: StdMutex<Vec<String>>,
        outcome: Option<SourceError>,
    }

    #[async_trait]
    impl QuoteSource for RecordingSource {
        async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError> {
            self.calls.lock().unwrap().push(address.to_string());
            if let Some(err) = &self.outcome {
                return Err(err.clone());
            }
            Ok(QuoteResponse {
                from: "origin".to_string(),
                to: address.to_string(),
                distance_km: Some("2.00".to_string()),
                duration_min: 35,
                travel_min: Some(10),
                cooking_min: 20,
                cost: dec!(5),
            })
        }
    }

    fn debounced(source: Arc<RecordingSource>) -> DebouncedEstimator<RecordingSource> {
        DebouncedEstimator::new(ClientEstimator::default(), source, DEFAULT_DEBOUNCE)
    }

    #[tokio::test]
    async fn local_estimate_matches_engine_zone_tier() {
        let engine = QuoteEngine::new(QuoteSettings::default());
        let estimator = ClientEstimator::for_engine(&engine);

        for postcode in ["SW1A 1AA", "E1 6AN", "W1J 0DB", "N1 9GU", "NW3 2QG", "SE1 7PB"] {
            let local = estimator.estimate(postcode).unwrap();
            let quote = engine.quote(postcode).await.unwrap();
            assert_eq!(local.cost, quote.cost, "{postcode}");
            assert_eq!(
                local.total_duration_minutes, quote.total_duration_minutes,
                "{postcode}"
            );
        }
        assert_eq!(estimator.estimate("EC1A 1BB"), None);
    }

    #[test]
    fn completeness_heuristic() {
        assert!(!looks_complete("SW1A"));
        assert!(!looks_complete("SW1A1AA"));
        assert!(looks_complete("SW1A 1AA"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_input_is_looked_up() {
        let source = Arc::new(RecordingSource::default());
        let field = debounced(source.clone());
        let mut updates = field.subscribe();

        field.input("s");
        assert_eq!(field.current(), EstimateState::Incomplete);
        field.input("SW1A 1A");
        field.input("sw1a 1aa");
        assert!(matches!(field.current(), EstimateState::Provisional(_)));

        tokio::time::sleep(Duration::from_millis(900)).await;
        updates
            .wait_for(|state| matches!(state, EstimateState::Confirmed(_)))
            .await
            .unwrap();

        assert_eq!(*source.calls.lock().unwrap(), vec!["SW1A 1AA".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_input_cancels_pending_lookup() {
        let source = Arc::new(RecordingSource::default());
        let field = debounced(source.clone());

        field.input("SW1A 1AA");
        tokio::time::sleep(Duration::from_millis(500)).await;
        field.input("E1 6AN");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(source.calls.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(*source.calls.lock().unwrap(), vec!["E1 6AN".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_source_falls_back_to_zone_table() {
        let source = Arc::new(RecordingSource {
            outcome: Some(SourceError::Unreachable("connection refused".to_string())),
            ..RecordingSource::default()
        });
        let field = debounced(source);
        let mut updates = field.subscribe();

        field.input("NW3 2QG");
        let state = updates
            .wait_for(|state| matches!(state, EstimateState::Fallback(_)))
            .await
            .unwrap()
            .clone();

        assert_eq!(
            state,
            EstimateState::Fallback(LocalEstimate {
                zone: Zone::NW,
                cost: dec!(7),
                total_duration_minutes: 50,
            })
        );
        assert!(state.is_deliverable());
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_masked_by_fallback() {
        let source = Arc::new(RecordingSource {
            outcome: Some(SourceError::Rejected("too far".to_string())),
            ..RecordingSource::default()
        });
        let field = debounced(source);
        let mut updates = field.subscribe();

        field.input("SW1A 1AA");
        let state = updates
            .wait_for(|state| matches!(state, EstimateState::Unavailable(_)))
            .await
            .unwrap()
            .clone();
        assert_eq!(state, EstimateState::Unavailable("too far".to_string()));
        assert!(!state.is_deliverable());
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_field_goes_idle() {
        let source = Arc::new(RecordingSource::default());
        let field = debounced(source.clone());

        field.input("SW1A 1AA");
        field.input("");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(field.current(), EstimateState::Idle);
        assert!(source.calls.lock().unwrap().is_empty());
    }

    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl QuoteSource for GatedSource {
        async fn fetch_quote(&self, address: &str) -> Result<QuoteResponse, SourceError> {
            self.started.notify_one();
            self.release.notified().await;
            Err(SourceError::Rejected(format!("late answer for {address}")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answer_for_cleared_field_is_discarded() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let field = DebouncedEstimator::new(
            ClientEstimator::default(),
            source.clone(),
            DEFAULT_DEBOUNCE,
        );

        field.input("SW1A 1AA");
        source.started.notified().await;
        field.input("");
        source.release.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(field.current(), EstimateState::Idle);
    }

    #[test]
    fn stale_generation_never_overwrites_state() {
        let (state, _rx) = watch::channel(EstimateState::Idle);
        let latest = AtomicU64::new(2);

        assert!(!publish_if_current(
            &state,
            &latest,
            1,
            EstimateState::Unavailable("stale".to_string()),
        ));
        assert_eq!(*state.borrow(), EstimateState::Idle);

        assert!(publish_if_current(
            &state,
            &latest,
            2,
            EstimateState::Checking,
        ));
        assert_eq!(*state.borrow(), EstimateState::Checking);
    }
}
