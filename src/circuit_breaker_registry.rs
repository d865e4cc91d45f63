//! Registry for managing named circuit breakers.
//!
//! Breakers are created lazily on first use of a key, so callers never
//! need to pre-register every resource up front; they simply call
//! [`CircuitBreakerRegistry::execute`] with the key they want guarded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use crate::error::CoreError;
use crate::metrics::MetricsRegistry;

/// Registry keyed by breaker id, creating breakers on demand.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreakerPolicy>>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("keys", &self.inner.lock().unwrap().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), default_config, clock, metrics: MetricsRegistry::default() }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    fn breaker_for(&self, key: &str, config: Option<CircuitBreakerConfig>) -> CircuitBreakerPolicy {
        let mut map = self.inner.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| {
                CircuitBreakerPolicy::with_clock(config.unwrap_or_else(|| self.default_config.clone()), self.clock.clone())
                    .with_metrics(self.metrics.clone())
            })
            .clone()
    }

    /// Run `op` through the breaker for `key`, creating one with
    /// `config` (or the registry default) if this is the first call for
    /// that key.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        key: &str,
        config: Option<CircuitBreakerConfig>,
        op: Op,
    ) -> Result<T, CoreError<E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError<E>>>,
    {
        let breaker = self.breaker_for(key, config);
        breaker.execute(key, op).await
    }

    /// Current state of `key`'s breaker, if it has been created.
    pub fn get_status(&self, key: &str) -> Option<CircuitState> {
        self.inner.lock().unwrap().get(key).map(|b| b.state())
    }

    /// Reset a single breaker by key. No-op if the key was never created.
    pub fn reset(&self, key: &str) {
        if let Some(breaker) = self.inner.lock().unwrap().get(key) {
            breaker.reset();
        }
    }

    /// Reset every breaker currently tracked.
    pub fn reset_all(&self) {
        for breaker in self.inner.lock().unwrap().values() {
            breaker.reset();
        }
    }

    /// Keys whose breaker is not currently `Closed`.
    pub fn get_active_breakers(&self) -> Vec<String> {
        let map = self.inner.lock().unwrap();
        let mut keys: Vec<String> =
            map.iter().filter(|(_, b)| b.state() != CircuitState::Closed).map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of every tracked breaker's state, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().unwrap();
        let mut entries: Vec<(String, CircuitState)> = map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
