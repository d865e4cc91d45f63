//! Compose retry, circuit breaker, and fallback into a single call.
//!
//! The fixed layering, innermost to outermost, is retry, then circuit
//! breaker, then fallback: the raw operation is tried (and retried) first,
//! the breaker wraps that whole retry attempt and counts only the failure
//! that survives it, and the fallback chain wraps everything, seeing a
//! primary error only after retry (and the breaker's fail-fast) have
//! already surfaced it. A breaker that is open short-circuits retry
//! entirely (its `CircuitOpen` error is not `Inner`, so retry never
//! touches it) but still reaches the fallback chain, which also passes a
//! non-`Inner` error straight through.

use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::classifier::Classifiable;
use crate::error::CoreError;
use crate::fallback::FallbackChain;
use crate::retry::RetryPolicy;
use std::future::Future;

async fn run_with_retry<T, E, Fut, Op>(retry: Option<&RetryPolicy<E>>, mut op: Op) -> Result<T, CoreError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError<E>>>,
{
    match retry {
        Some(policy) => policy.execute(op).await,
        None => op().await,
    }
}

async fn run_with_breaker<T, E, Fut, Op>(
    breaker: Option<(&str, &CircuitBreakerRegistry)>,
    retry: Option<&RetryPolicy<E>>,
    mut op: Op,
) -> Result<T, CoreError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError<E>>>,
    T: Send + 'static,
    E: Classifiable + std::fmt::Display + Send + Sync + 'static,
{
    match breaker {
        Some((key, registry)) => {
            registry
                .execute(key, None, || run_with_retry(retry, &mut op))
                .await
        }
        None => run_with_retry(retry, &mut op).await,
    }
}

/// Run `op` through whichever of `retry` / `breaker` / `fallback` are
/// `Some`, in the fixed order described in the module docs.
pub async fn create_resilient<T, E, Fut, Op>(
    retry: Option<&RetryPolicy<E>>,
    breaker: Option<(&str, &CircuitBreakerRegistry)>,
    fallback: Option<&FallbackChain<T, E>>,
    mut op: Op,
) -> Result<T, CoreError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError<E>>>,
    T: Send + 'static,
    E: Classifiable + std::fmt::Display + Send + Sync + 'static,
{
    match fallback {
        Some(chain) => chain.execute(|| run_with_breaker(breaker, retry, &mut op)).await,
        None => run_with_breaker(breaker, retry, &mut op).await,
    }
}

/// Owns a fixed set of resilience layers so callers don't have to pass
/// the same `retry`/`breaker`/`fallback` references on every call.
pub struct ResilienceComposer<T, E> {
    retry: Option<RetryPolicy<E>>,
    breaker: Option<(String, CircuitBreakerRegistry)>,
    fallback: Option<FallbackChain<T, E>>,
}

impl<T, E> ResilienceComposer<T, E>
where
    T: Send + 'static,
    E: Classifiable + std::fmt::Display + Send + Sync + 'static,
{
    pub fn builder() -> ResilienceComposerBuilder<T, E> {
        ResilienceComposerBuilder::new()
    }

    pub async fn execute<Fut, Op>(&self, op: Op) -> Result<T, CoreError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError<E>>>,
    {
        create_resilient(
            self.retry.as_ref(),
            self.breaker.as_ref().map(|(key, registry)| (key.as_str(), registry)),
            self.fallback.as_ref(),
            op,
        )
        .await
    }
}

pub struct ResilienceComposerBuilder<T, E> {
    retry: Option<RetryPolicy<E>>,
    breaker: Option<(String, CircuitBreakerRegistry)>,
    fallback: Option<FallbackChain<T, E>>,
}

impl<T, E> ResilienceComposerBuilder<T, E> {
    pub fn new() -> Self {
        Self { retry: None, breaker: None, fallback: None }
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, key: impl Into<String>, registry: CircuitBreakerRegistry) -> Self {
        self.breaker = Some((key.into(), registry));
        self
    }

    pub fn fallback(mut self, chain: FallbackChain<T, E>) -> Self {
        self.fallback = Some(chain);
        self
    }

    pub fn build(self) -> ResilienceComposer<T, E> {
        ResilienceComposer { retry: self.retry, breaker: self.breaker, fallback: self.fallback }
    }
}

impl<T, E> Default for ResilienceComposerBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
