//! Circuit breaker state machine.
//!
//! Guards a single protected resource. Three states: `Closed` lets calls
//! through and counts consecutive failures; `Open` fails fast until a
//! reset timeout elapses; `HalfOpen` lets a bounded number of trial calls
//! through to decide whether to close again or reopen.

use crate::clock::{Clock, MonotonicClock};
use crate::error::CoreError;
use crate::metrics::MetricsRegistry;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for a single breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before the breaker trips.
    pub failure_threshold: usize,
    /// How long `Open` lasts before a trial call is allowed through.
    pub reset_timeout: Duration,
    /// Consecutive successes required in `HalfOpen` before closing again.
    pub half_open_requests: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_millis(60_000), half_open_requests: 3 }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: usize,
    half_open_successes: usize,
    next_retry_at: u64,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// A single breaker guarding one resource key.
///
/// Cloning shares the underlying state (it is an `Arc` handle), so a
/// `CircuitBreakerPolicy` can be handed to concurrent callers the way
/// [`crate::circuit_breaker_registry::CircuitBreakerRegistry`] hands out
/// per-key handles.
#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    on_open: Hook,
    on_close: Hook,
    on_half_open: Hook,
    metrics: MetricsRegistry,
}

impl std::fmt::Debug for CircuitBreakerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("config", &self.config)
            .field("state", &self.inner.lock().unwrap().state)
            .finish()
    }
}

impl CircuitBreakerPolicy {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                next_retry_at: 0,
            })),
            clock,
            on_open: Arc::new(|| {}),
            on_close: Arc::new(|| {}),
            on_half_open: Arc::new(|| {}),
            metrics: MetricsRegistry::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn on_open<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_open = Arc::new(hook);
        self
    }

    pub fn on_close<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_close = Arc::new(hook);
        self
    }

    pub fn on_half_open<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_half_open = Arc::new(hook);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> usize {
        self.inner.lock().unwrap().failure_count
    }

    /// Force the breaker back to `Closed`, clearing counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.next_retry_at = 0;
    }

    /// Run `op` through the breaker, using `key` only for the error it
    /// raises when open.
    pub async fn execute<T, E, Fut, Op>(&self, key: &str, op: Op) -> Result<T, CoreError<E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError<E>>>,
    {
        if let Some(wait) = self.gate(key) {
            return Err(CoreError::CircuitOpen {
                key: key.to_string(),
                failure_count: self.inner.lock().unwrap().failure_count,
                retry_after: wait,
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Check whether a call may proceed. Transitions `Open` -> `HalfOpen`
    /// when the reset timeout has elapsed. Returns `Some(wait)` when the
    /// call must be failed fast.
    fn gate(&self, _key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let now = self.clock.now_millis();
                if now >= inner.next_retry_at {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    drop(inner);
                    tracing::info!("circuit breaker → half-open");
                    (self.on_half_open)();
                    None
                } else {
                    Some(Duration::from_millis(inner.next_retry_at - now))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_requests {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                    drop(inner);
                    tracing::info!("circuit breaker → closed");
                    (self.on_close)();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_retry_at = self.clock.now_millis() + self.config.reset_timeout.as_millis() as u64;
                    let failures = inner.failure_count;
                    drop(inner);
                    self.metrics.record_circuit_breaker_trip();
                    tracing::error!(failures, threshold = self.config.failure_threshold, "circuit breaker → open");
                    eprintln!("DEBUG calling on_open, closed-branch, ptr={:p}", std::sync::Arc::as_ptr(&self.on_open));
                    (self.on_open)();
                    eprintln!("DEBUG after on_open call");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_retry_at = self.clock.now_millis() + self.config.reset_timeout.as_millis() as u64;
                drop(inner);
                tracing::warn!("circuit breaker: half-open trial failed → open");
                (self.on_open)();
            }
            CircuitState::Open => {}
        }
    }
}
