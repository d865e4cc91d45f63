//! Process-wide counters aggregated across the retry, circuit breaker,
//! fallback, and workflow engines.
//!
//! A single [`MetricsRegistry`] is meant to be cloned (it is a thin
//! `Arc` handle) and shared across every engine a [`crate::composer`]
//! wires together.

use crate::classifier::{Category, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    total_errors: AtomicU64,
    retry_attempts: AtomicU64,
    successful_retries: AtomicU64,
    fallback_activations: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    total_executions: AtomicU64,
    successful_recoveries: AtomicU64,
    partial_recoveries: AtomicU64,
    failed_recoveries: AtomicU64,
    recovery_time_total_ms: AtomicU64,
    recovery_time_samples: AtomicU64,
    by_category: Mutex<HashMap<Category, u64>>,
    by_severity: Mutex<HashMap<Severity, u64>>,
}

/// Snapshot of every counter, taken without holding any lock longer than
/// necessary to copy it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub total_errors: u64,
    pub errors_by_category: HashMap<Category, u64>,
    pub errors_by_severity: HashMap<Severity, u64>,
    pub retry_attempts: u64,
    pub successful_retries: u64,
    pub fallback_activations: u64,
    pub circuit_breaker_trips: u64,
    pub recovery_executions: u64,
    pub successful_recoveries: u64,
    pub partial_recoveries: u64,
    pub failed_recoveries: u64,
    pub average_recovery_time_ms: f64,
}

/// Cheap-to-clone handle to a shared set of resilience counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Counters>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, category: Category, severity: Severity) {
        self.inner.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.inner.by_category.lock().unwrap().entry(category).or_insert(0) += 1;
        *self.inner.by_severity.lock().unwrap().entry(severity).or_insert(0) += 1;
    }

    pub fn record_retry_attempt(&self) {
        self.inner.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_successful_retry(&self) {
        self.inner.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_activation(&self) {
        self.inner.fallback_activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery_execution(&self, outcome: RecoveryOutcome, duration_ms: Option<u64>) {
        self.inner.total_executions.fetch_add(1, Ordering::Relaxed);
        match outcome {
            RecoveryOutcome::Success => {
                self.inner.successful_recoveries.fetch_add(1, Ordering::Relaxed);
                if let Some(ms) = duration_ms {
                    self.inner.recovery_time_total_ms.fetch_add(ms, Ordering::Relaxed);
                    self.inner.recovery_time_samples.fetch_add(1, Ordering::Relaxed);
                }
            }
            RecoveryOutcome::Partial => {
                self.inner.partial_recoveries.fetch_add(1, Ordering::Relaxed);
            }
            RecoveryOutcome::Failed => {
                self.inner.failed_recoveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.inner.recovery_time_samples.load(Ordering::Relaxed);
        let total_ms = self.inner.recovery_time_total_ms.load(Ordering::Relaxed);
        let average_recovery_time_ms = if samples == 0 { 0.0 } else { total_ms as f64 / samples as f64 };

        MetricsSnapshot {
            total_errors: self.inner.total_errors.load(Ordering::Relaxed),
            errors_by_category: self.inner.by_category.lock().unwrap().clone(),
            errors_by_severity: self.inner.by_severity.lock().unwrap().clone(),
            retry_attempts: self.inner.retry_attempts.load(Ordering::Relaxed),
            successful_retries: self.inner.successful_retries.load(Ordering::Relaxed),
            fallback_activations: self.inner.fallback_activations.load(Ordering::Relaxed),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            recovery_executions: self.inner.total_executions.load(Ordering::Relaxed),
            successful_recoveries: self.inner.successful_recoveries.load(Ordering::Relaxed),
            partial_recoveries: self.inner.partial_recoveries.load(Ordering::Relaxed),
            failed_recoveries: self.inner.failed_recoveries.load(Ordering::Relaxed),
            average_recovery_time_ms,
        }
    }

    /// Zero every counter atomically with respect to readers taking a
    /// snapshot (each field resets independently but `reset` itself holds
    /// the map locks for its short critical section).
    pub fn reset(&self) {
        self.inner.total_errors.store(0, Ordering::Relaxed);
        self.inner.retry_attempts.store(0, Ordering::Relaxed);
        self.inner.successful_retries.store(0, Ordering::Relaxed);
        self.inner.fallback_activations.store(0, Ordering::Relaxed);
        self.inner.circuit_breaker_trips.store(0, Ordering::Relaxed);
        self.inner.total_executions.store(0, Ordering::Relaxed);
        self.inner.successful_recoveries.store(0, Ordering::Relaxed);
        self.inner.partial_recoveries.store(0, Ordering::Relaxed);
        self.inner.failed_recoveries.store(0, Ordering::Relaxed);
        self.inner.recovery_time_total_ms.store(0, Ordering::Relaxed);
        self.inner.recovery_time_samples.store(0, Ordering::Relaxed);
        self.inner.by_category.lock().unwrap().clear();
        self.inner.by_severity.lock().unwrap().clear();
    }
}

/// Outcome recorded for a completed recovery workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Success,
    Partial,
    Failed,
}
