/*!
 * # Circuit Breaker
 *
 * Guards calls to the external geocoding and routing providers. When a
 * provider keeps failing, the breaker opens and callers skip the request
 * entirely, falling back to a coarser delivery estimate instead of waiting
 * on a timeout for every quote.
 */

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are skipped until the reset timeout elapses
    Open,
    /// A trial request is allowed through to probe recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial request
    pub reset_timeout: Duration,
    /// Successful trials needed in HalfOpen to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Failure-counting breaker for one provider endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a request may be sent now. Moves Open to HalfOpen once the
    /// reset timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(provider = self.name, "circuit half-open, probing provider");
                }
                elapsed
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                    info!(provider = self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        let should_open = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            state.state = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            state.success_count = 0;
            warn!(
                provider = self.name,
                failures = state.failure_count,
                "circuit opened"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
