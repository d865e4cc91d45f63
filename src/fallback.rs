//! Fallback chains.
//!
//! When a primary operation fails, a [`FallbackChain`] tries a
//! priority-ordered list of alternative handlers, skipping any that are
//! unhealthy, don't cover the primary error's category, or have been
//! running too slow lately.

use crate::classifier::{classify_error, Category, Classifiable};
use crate::error::CoreError;
use crate::metrics::MetricsRegistry;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Key under which the primary operation's own health/latency is tracked
/// in [`FallbackChain::get_service_health`] and
/// [`FallbackChain::get_latency_metrics`].
const PRIMARY_KEY: &str = "primary";

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, CoreError<E>>> + Send>>;
type Handler<T, E> = Arc<dyn Fn() -> BoxFuture<T, E> + Send + Sync>;
type HealthCheck = Arc<dyn Fn() -> bool + Send + Sync>;
type FallbackHook = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Fixed-capacity FIFO of recent latency samples, used to gate a fallback
/// entry whose `max_latency` has been configured.
#[derive(Debug)]
pub struct LatencyRing {
    capacity: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), samples: Mutex::new(VecDeque::new()) }
    }

    pub fn record(&self, sample: Duration) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn average(&self) -> Option<Duration> {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatencyRing {
    fn default() -> Self {
        Self::new(100)
    }
}

/// One candidate in a [`FallbackChain`].
pub struct FallbackEntry<T, E> {
    name: String,
    priority: i32,
    handler: Handler<T, E>,
    health_check: Option<HealthCheck>,
    error_categories: Option<Vec<Category>>,
    max_latency: Option<Duration>,
    latency: LatencyRing,
}

impl<T, E> FallbackEntry<T, E> {
    /// Lower `priority` values are tried first.
    pub fn new<F, Fut>(name: impl Into<String>, priority: i32, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError<E>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            handler: Arc::new(move || Box::pin(handler())),
            health_check: None,
            error_categories: None,
            max_latency: None,
            latency: LatencyRing::default(),
        }
    }

    pub fn health_check<F: Fn() -> bool + Send + Sync + 'static>(mut self, check: F) -> Self {
        self.health_check = Some(Arc::new(check));
        self
    }

    pub fn error_categories(mut self, categories: Vec<Category>) -> Self {
        self.error_categories = Some(categories);
        self
    }

    pub fn max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    fn is_eligible(&self, primary_category: Category) -> bool {
        if let Some(check) = &self.health_check {
            if !check() {
                return false;
            }
        }
        if let Some(categories) = &self.error_categories {
            if !categories.contains(&primary_category) {
                return false;
            }
        }
        if let Some(max_latency) = self.max_latency {
            if let Some(avg) = self.latency.average() {
                if avg > max_latency {
                    return false;
                }
            }
        }
        true
    }
}

/// Priority-ordered list of fallback handlers tried when a primary
/// operation's error is [`CoreError::Inner`].
pub struct FallbackChain<T, E> {
    entries: Vec<FallbackEntry<T, E>>,
    on_fallback: FallbackHook,
    metrics: MetricsRegistry,
    primary_latency: LatencyRing,
    health_status: Mutex<HashMap<String, bool>>,
}

impl<T, E> FallbackChain<T, E> {
    pub fn builder() -> FallbackChainBuilder<T, E> {
        FallbackChainBuilder::new()
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Last observed success/failure for the primary operation (under
    /// `"primary"`) and every fallback entry that has been invoked at
    /// least once.
    pub fn get_service_health(&self) -> HashMap<String, bool> {
        self.health_status.lock().unwrap().clone()
    }

    /// Average observed latency for the primary operation (under
    /// `"primary"`) and every fallback entry that has recorded at least
    /// one sample.
    pub fn get_latency_metrics(&self) -> HashMap<String, Duration> {
        let mut metrics = HashMap::new();
        if let Some(avg) = self.primary_latency.average() {
            metrics.insert(PRIMARY_KEY.to_string(), avg);
        }
        for entry in &self.entries {
            if let Some(avg) = entry.latency.average() {
                metrics.insert(entry.name.clone(), avg);
            }
        }
        metrics
    }

    fn record_health(&self, name: &str, healthy: bool) {
        self.health_status.lock().unwrap().insert(name.to_string(), healthy);
    }
}

impl<T, E> FallbackChain<T, E>
where
    T: Send + 'static,
    E: Classifiable + std::fmt::Display + Send + Sync + 'static,
{
    /// Run `primary`; on `CoreError::Inner`, try each eligible fallback in
    /// priority order. Any other `CoreError` variant passes through
    /// unchanged, since the primary already failed fast or exhausted
    /// retries on its own terms.
    pub async fn execute<Fut>(&self, primary: impl FnOnce() -> Fut) -> Result<T, CoreError<E>>
    where
        Fut: Future<Output = Result<T, CoreError<E>>>,
    {
        let start = Instant::now();
        let result = primary().await;
        self.primary_latency.record(start.elapsed());
        self.record_health(PRIMARY_KEY, result.is_ok());

        match result {
            Ok(value) => Ok(value),
            Err(CoreError::Inner(primary_error)) => self.run_fallbacks(primary_error).await,
            Err(other) => Err(other),
        }
    }

    async fn run_fallbacks(&self, primary_error: E) -> Result<T, CoreError<E>> {
        let category = classify_error(&primary_error).category;

        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.is_eligible(category) {
                continue;
            }

            self.metrics.record_fallback_activation();
            (self.on_fallback)(&entry.name, index);
            tracing::debug!(fallback = %entry.name, "attempting fallback");

            let start = Instant::now();
            let result = (entry.handler)().await;
            entry.latency.record(start.elapsed());
            self.record_health(&entry.name, result.is_ok());

            if let Ok(value) = result {
                tracing::info!(fallback = %entry.name, "primary failed, recovered via fallback");
                return Ok(value);
            }
            tracing::debug!(fallback = %entry.name, "fallback entry failed, trying next");
        }

        tracing::warn!(category = ?category, "fallback chain exhausted");
        Err(CoreError::FallbacksExhausted { primary_message: primary_error.to_string() })
    }
}

/// Builds a [`FallbackChain`], sorting entries by ascending priority.
pub struct FallbackChainBuilder<T, E> {
    entries: Vec<FallbackEntry<T, E>>,
    on_fallback: FallbackHook,
    metrics: MetricsRegistry,
}

impl<T, E> FallbackChainBuilder<T, E> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), on_fallback: Arc::new(|_, _| {}), metrics: MetricsRegistry::default() }
    }

    pub fn entry(mut self, entry: FallbackEntry<T, E>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn on_fallback<F: Fn(&str, usize) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_fallback = Arc::new(hook);
        self
    }

    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(mut self) -> FallbackChain<T, E> {
        self.entries.sort_by_key(|e| e.priority);
        FallbackChain {
            entries: self.entries,
            on_fallback: self.on_fallback,
            metrics: self.metrics,
            primary_latency: LatencyRing::default(),
            health_status: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, E> Default for FallbackChainBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SvcError(&'static str);
    impl std::fmt::Display for SvcError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for SvcError {}
    impl Classifiable for SvcError {
        fn classification(&self) -> Option<Classification> {
            None
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallbacks() {
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("cache", 1, move || {
                called2.fetch_add(1, Ordering::SeqCst);
                async { Ok("fallback") }
            }))
            .build();

        let result = chain.execute(|| async { Ok("primary") }).await;
        assert_eq!(result.unwrap(), "primary");
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_in_priority_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();

        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("secondary", 5, move || {
                o2.lock().unwrap().push("secondary");
                async { Ok("from-secondary") }
            }))
            .entry(FallbackEntry::new("primary-fallback", 1, move || {
                o1.lock().unwrap().push("primary-fallback");
                async { Err(CoreError::Inner(SvcError("still broken"))) }
            }))
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("network error"))) }).await;
        assert_eq!(result.unwrap(), "from-secondary");
        assert_eq!(*order.lock().unwrap(), vec!["primary-fallback", "secondary"]);
    }

    #[tokio::test]
    async fn unhealthy_entries_are_skipped() {
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(
                FallbackEntry::new("down", 1, || async { Ok("should-not-run") }).health_check(|| false),
            )
            .entry(FallbackEntry::new("up", 2, || async { Ok("healthy") }))
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("boom"))) }).await;
        assert_eq!(result.unwrap(), "healthy");
    }

    #[tokio::test]
    async fn category_filter_excludes_non_matching_entries() {
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(
                FallbackEntry::new("auth-only", 1, || async { Ok("auth-path") })
                    .error_categories(vec![Category::Authentication]),
            )
            .entry(FallbackEntry::new("general", 2, || async { Ok("general-path") }))
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("network error"))) }).await;
        assert_eq!(result.unwrap(), "general-path");
    }

    #[tokio::test]
    async fn exhausted_chain_reports_primary_message() {
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("a", 1, || async { Err(CoreError::Inner(SvcError("a-down"))) }))
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("primary-down"))) }).await;
        match result {
            Err(CoreError::FallbacksExhausted { primary_message }) => assert_eq!(primary_message, "primary-down"),
            other => panic!("expected FallbacksExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_inner_primary_errors_skip_fallbacks_entirely() {
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("a", 1, move || {
                called2.fetch_add(1, Ordering::SeqCst);
                async { Ok("fallback") }
            }))
            .build();

        let result = chain
            .execute(|| async {
                Err(CoreError::CircuitOpen { key: "svc".into(), failure_count: 1, retry_after: Duration::from_secs(1) })
            })
            .await;

        assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn on_fallback_hook_reports_name_and_index() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();

        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("first", 1, || async { Ok("ok") }))
            .on_fallback(move |name, index| {
                *seen2.lock().unwrap() = Some((name.to_string(), index));
            })
            .build();

        let _ = chain.execute(|| async { Err(CoreError::Inner(SvcError("boom"))) }).await;
        assert_eq!(*seen.lock().unwrap(), Some(("first".to_string(), 0)));
    }

    #[test]
    fn latency_ring_evicts_oldest_past_capacity() {
        let ring = LatencyRing::new(3);
        ring.record(Duration::from_millis(10));
        ring.record(Duration::from_millis(20));
        ring.record(Duration::from_millis(30));
        ring.record(Duration::from_millis(40));

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.average(), Some(Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn fallback_activation_and_hook_fire_for_every_attempted_entry() {
        let hook_calls = Arc::new(Mutex::new(Vec::new()));
        let hook_calls2 = hook_calls.clone();
        let metrics = MetricsRegistry::new();

        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("first", 1, || async { Err(CoreError::Inner(SvcError("still down"))) }))
            .entry(FallbackEntry::new("second", 2, || async { Ok("recovered") }))
            .on_fallback(move |name, index| {
                hook_calls2.lock().unwrap().push((name.to_string(), index));
            })
            .metrics(metrics.clone())
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("boom"))) }).await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(*hook_calls.lock().unwrap(), vec![("first".to_string(), 0), ("second".to_string(), 1)]);
        assert_eq!(metrics.snapshot().fallback_activations, 2);
    }

    #[tokio::test]
    async fn service_health_and_latency_metrics_track_primary_and_fallbacks() {
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("cache", 1, || async { Ok("from-cache") }))
            .build();

        let _ = chain.execute(|| async { Err(CoreError::Inner(SvcError("boom"))) }).await;

        let health = chain.get_service_health();
        assert_eq!(health.get(PRIMARY_KEY), Some(&false));
        assert_eq!(health.get("cache"), Some(&true));

        let latency = chain.get_latency_metrics();
        assert!(latency.contains_key(PRIMARY_KEY));
        assert!(latency.contains_key("cache"));
    }

    #[tokio::test]
    async fn entry_without_latency_samples_ignores_max_latency_cap() {
        // No samples recorded yet, so the cap can't exclude it on the first call.
        let chain: FallbackChain<&str, SvcError> = FallbackChain::builder()
            .entry(FallbackEntry::new("a", 1, || async { Ok("ok") }).max_latency(Duration::from_millis(1)))
            .build();

        let result = chain.execute(|| async { Err(CoreError::Inner(SvcError("boom"))) }).await;
        assert_eq!(result.unwrap(), "ok");
    }
}
