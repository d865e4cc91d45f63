#![forbid(unsafe_code)]

//! Resilience middleware for async Rust.
//!
//! Four composable patterns share one error type, [`CoreError`]: retry
//! with backoff and jitter, a per-resource circuit breaker, priority-
//! ordered fallback chains, and trigger-driven recovery workflows. An
//! error classifier maps arbitrary failures onto a category, severity,
//! and retry/fallback/recovery eligibility, so every layer makes the
//! same decision about the same error without callers having to
//! hand-write predicates for each one.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use resilience_core::{CoreError, RetryPolicy};
//!
//! async fn flaky_operation(attempts: Arc<AtomicUsize>) -> Result<(), CoreError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(CoreError::Inner(std::io::Error::new(std::io::ErrorKind::Other, "transient failure")))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CoreError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .initial_delay(Duration::from_millis(50))
//!         .build();
//!
//!     retry.execute(|| flaky_operation(attempts.clone())).await?;
//!     Ok(())
//! }
//! ```
//!
//! To stack retry, a circuit breaker, and a fallback chain behind one
//! call, see [`composer::create_resilient`] or [`composer::ResilienceComposer`].

mod backoff;
mod circuit_breaker;
mod circuit_breaker_registry;
mod classifier;
mod clock;
mod composer;
mod error;
mod fallback;
mod jitter;
mod metrics;
mod retry;
mod sleeper;
mod workflow;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use classifier::{classify, classify_error, Category, Classifiable, Classification, Severity};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use composer::{create_resilient, ResilienceComposer, ResilienceComposerBuilder};
pub use error::CoreError;
pub use fallback::{FallbackChain, FallbackChainBuilder, FallbackEntry, LatencyRing};
pub use metrics::{MetricsRegistry, MetricsSnapshot, RecoveryOutcome};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use workflow::{
    BroadcastPublisher, ExecutionRecord, Publisher, RecoveryWorkflow, Step, StepError, WorkflowEngine,
    WorkflowEngineBuilder, WorkflowEvent, WorkflowStatus, WorkflowTrigger,
};

pub mod prelude;
