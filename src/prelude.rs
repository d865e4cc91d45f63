//! Convenient re-exports for common resilience-core types.
pub use crate::{
    classify, classify_error, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerRegistry,
    CircuitState, Classifiable, Classification, CoreError, FallbackChain, FallbackEntry,
    MetricsRegistry, RecoveryWorkflow, ResilienceComposer, RetryPolicy, Step, WorkflowEngine,
    WorkflowTrigger,
};
