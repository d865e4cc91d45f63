//! Retry policy implementation
//!
//! Provides configurable retry with backoff and jitter, plus retry predicate and pluggable sleeper.

use crate::backoff;
use crate::classifier::{classify_error, Classifiable};
use crate::error::CoreError;
use crate::jitter;
use crate::metrics::MetricsRegistry;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default retry predicate: defer to the error's classification, retrying
/// only when `classify_error` reports it retryable.
fn default_should_retry<E>(error: &E) -> bool
where
    E: Classifiable + std::fmt::Display,
{
    classify_error(error).retryable
}

/// Configurable retry-with-backoff policy.
///
/// `execute` only retries on `CoreError::Inner(e)` where `should_retry(e)`
/// is true; every other `CoreError` variant (a circuit already open, an
/// earlier retry exhaustion, fallbacks exhausted) passes straight through,
/// since those layers have already made their own retry decision.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Arc<dyn Fn(&E, usize) + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: MetricsRegistry,
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Run `op`, retrying per this policy's configuration.
    ///
    /// `op` is called at least once. Whether the final failure is
    /// non-retryable or the policy simply runs out of attempts, the
    /// original error is re-raised unchanged as `CoreError::Inner` — this
    /// engine never wraps it.
    pub async fn execute<T, Fut, Op>(&self, mut op: Op) -> Result<T, CoreError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError<E>>>,
    {
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.metrics.record_successful_retry();
                    }
                    return Ok(value);
                }
                Err(CoreError::Inner(e)) => {
                    let retryable = (self.should_retry)(&e);
                    if !retryable || attempt >= self.max_attempts {
                        return Err(CoreError::Inner(e));
                    }

                    (self.on_retry)(&e, attempt);

                    self.metrics.record_retry_attempt();
                    let raw = backoff::raw_delay(self.initial_delay, self.backoff_multiplier, attempt);
                    let jittered = jitter::apply(raw);
                    let delay = jittered.min(self.max_delay);
                    self.sleeper.sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

/// Fluent constructor for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    should_retry: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    on_retry: Arc<dyn Fn(&E, usize) + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: MetricsRegistry,
}

impl<E> RetryPolicyBuilder<E> {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            should_retry: None,
            on_retry: Arc::new(|_, _| {}),
            sleeper: Arc::new(TokioSleeper),
            metrics: MetricsRegistry::default(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, usize) + Send + Sync + 'static,
    {
        self.on_retry = Arc::new(hook);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }
}

impl<E> RetryPolicyBuilder<E>
where
    E: Classifiable + std::fmt::Display + Send + Sync + 'static,
{
    /// Build the policy, defaulting `should_retry` to `classify_error(err).retryable`
    /// when none was supplied.
    pub fn build(self) -> RetryPolicy<E> {
        let should_retry = self.should_retry.unwrap_or_else(|| Arc::new(default_should_retry::<E>));
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            should_retry,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
            metrics: self.metrics,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
