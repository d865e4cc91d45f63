//! Recovery workflow engine.
//!
//! A [`RecoveryWorkflow`] is a named sequence of [`Step`]s that runs when
//! its [`WorkflowTrigger`] sees enough matching errors inside a rolling
//! time window. [`WorkflowEngine`] owns the registered workflows, the
//! error history used to evaluate triggers, and an optional background
//! monitor task that polls for trigger conditions.

use crate::classifier::{classify_error, Category, Classification, Severity};
use crate::clock::{Clock, MonotonicClock};
use crate::error::CoreError;
use crate::metrics::{MetricsRegistry, RecoveryOutcome};
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const ONE_HOUR_MS: u64 = 60 * 60 * 1000;
const DEFAULT_WORKFLOW_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_TRIGGER_WINDOW_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: usize = 3;

/// Type-erased error carried by a [`Step`]'s action, validation, and
/// rollback — a workflow's steps commonly call into unrelated external
/// systems, so there's no single concrete error type to share.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

type StepActionFuture = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>>;
type StepAction = Arc<dyn Fn() -> StepActionFuture + Send + Sync>;
type StepValidationFuture = Pin<Box<dyn Future<Output = bool> + Send>>;
type StepValidation = Arc<dyn Fn() -> StepValidationFuture + Send + Sync>;
type StepRollbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type StepRollback = Arc<dyn Fn() -> StepRollbackFuture + Send + Sync>;

/// A single unit of recovery work: an action wrapped in the retry engine,
/// an optional post-action validation, and an optional rollback run when
/// the step fails.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    action: StepAction,
    validation: Option<StepValidation>,
    rollback: Option<StepRollback>,
    pub continue_on_failure: bool,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || Box::pin(action())),
            validation: None,
            rollback: None,
            continue_on_failure: false,
        }
    }

    /// Run after a successful action; returning `false` is treated as a
    /// step failure ("Validation failed for step: <name>").
    pub fn validation<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.validation = Some(Arc::new(move || Box::pin(check())));
        self
    }

    /// Run once, after this step fails, before deciding whether to stop or
    /// continue. Rollback errors are logged and swallowed.
    pub fn rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.rollback = Some(Arc::new(move || Box::pin(rollback())));
        self
    }

    /// If set, a failure of this step doesn't stop the workflow.
    pub fn continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }
}

/// Condition that causes a workflow to auto-execute: at least
/// `threshold_count` errors inside the trailing `time_window`, with at
/// least one configured filter dimension (category, severity, or message
/// pattern) also meeting that threshold. A trigger with no filters
/// configured fires on the windowed count alone.
#[derive(Debug, Clone)]
pub struct WorkflowTrigger {
    pub error_categories: Option<Vec<Category>>,
    pub error_severities: Option<Vec<Severity>>,
    pub error_patterns: Option<Vec<String>>,
    pub threshold_count: usize,
    pub time_window: Duration,
}

impl Default for WorkflowTrigger {
    fn default() -> Self {
        Self {
            error_categories: None,
            error_severities: None,
            error_patterns: None,
            threshold_count: 1,
            time_window: Duration::from_millis(DEFAULT_TRIGGER_WINDOW_MS),
        }
    }
}

/// A named, ordered list of recovery steps with a trigger, timeout, and
/// per-step retry budget.
#[derive(Clone)]
pub struct RecoveryWorkflow {
    pub name: String,
    pub trigger: WorkflowTrigger,
    pub steps: Vec<Step>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl RecoveryWorkflow {
    pub fn new(name: impl Into<String>, trigger: WorkflowTrigger, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            trigger,
            steps,
            timeout: Duration::from_millis(DEFAULT_WORKFLOW_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

/// Live status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    Success,
    Partial,
    Failed,
}

/// Outcome of one workflow run, retained indefinitely for inspection and
/// auditing. Created when the run starts and mutated only by that run.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: uuid::Uuid,
    pub workflow_name: String,
    pub started_at_millis: u64,
    pub ended_at_millis: Option<u64>,
    pub status: WorkflowStatus,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub error: Option<String>,
}

/// Lifecycle events a [`WorkflowEngine`] emits around each execution.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Started { workflow: String, started_at_millis: u64 },
    Completed { workflow: String, outcome: RecoveryOutcome, duration_ms: u64 },
}

/// Sink for [`WorkflowEvent`]s. Kept minimal since transport (webhook,
/// message bus, log sink) is an external concern.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent);
}

/// In-memory [`Publisher`] backed by a broadcast channel, useful for
/// tests and for wiring a process-local subscriber.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, event: WorkflowEvent) {
        // No subscribers is not an error; the event is simply dropped.
        let _ = self.tx.send(event);
    }
}

/// One recorded error, classified at the time it was observed.
#[derive(Debug, Clone)]
struct ErrorEvent {
    message: String,
    classification: Classification,
    at_millis: u64,
}

fn pattern_name(category: Category) -> &'static str {
    match category {
        Category::Timeout => "timeout",
        Category::RateLimit => "rate_limit",
        Category::Network => "network",
        Category::Authentication => "auth",
        Category::Resource => "resource",
        _ => "unknown",
    }
}

/// Owns registered workflows, the rolling error history used to evaluate
/// triggers, every execution record ever produced, and (optionally) a
/// background monitor task.
pub struct WorkflowEngine {
    workflows: Mutex<HashMap<String, RecoveryWorkflow>>,
    error_history: Mutex<Vec<ErrorEvent>>,
    executions: Mutex<Vec<ExecutionRecord>>,
    pattern_counts: Mutex<HashMap<&'static str, u64>>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    metrics: MetricsRegistry,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkflowEngine {
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::builder().clock(clock).build()
    }

    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    pub fn register_workflow(&self, workflow: RecoveryWorkflow) {
        self.workflows.lock().unwrap().insert(workflow.name.clone(), workflow);
    }

    pub fn metrics(&self) -> MetricsRegistry {
        self.metrics.clone()
    }

    /// Counters bumped by [`Self::record_error`], one per classification
    /// pattern (`timeout`/`rate_limit`/`network`/`auth`/`resource`/`unknown`).
    pub fn pattern_counts(&self) -> HashMap<&'static str, u64> {
        self.pattern_counts.lock().unwrap().clone()
    }

    /// Every execution record still in the `running` state.
    pub fn get_active_executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().unwrap().iter().filter(|e| e.status == WorkflowStatus::Running).cloned().collect()
    }

    /// Up to `limit` most recent execution records, newest first.
    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.executions.lock().unwrap().iter().rev().take(limit).cloned().collect()
    }

    /// Record an observed error for trigger evaluation: classify it, store
    /// `{error, timestamp, classification}`, prune anything older than one
    /// hour, and bump its pattern counter.
    pub fn record_error<E>(&self, error: &E)
    where
        E: crate::classifier::Classifiable + std::fmt::Display,
    {
        let classification = classify_error(error);
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(ONE_HOUR_MS);

        let mut history = self.error_history.lock().unwrap();
        history.push(ErrorEvent { message: error.to_string(), classification, at_millis: now });
        history.retain(|e| e.at_millis >= cutoff);
        drop(history);

        *self.pattern_counts.lock().unwrap().entry(pattern_name(classification.category)).or_insert(0) += 1;
    }

    /// Whether `trigger`'s fire condition currently holds: the windowed
    /// subset meets `threshold_count`, and (if any filter dimension is
    /// configured) at least one of category/severity/pattern match counts
    /// also meets it.
    fn should_trigger(&self, trigger: &WorkflowTrigger) -> bool {
        let now = self.clock.now_millis();
        let window_start = now.saturating_sub(trigger.time_window.as_millis() as u64);
        let history = self.error_history.lock().unwrap();
        let subset: Vec<&ErrorEvent> = history.iter().filter(|e| e.at_millis >= window_start).collect();

        if subset.len() < trigger.threshold_count {
            return false;
        }

        let mut any_filter_configured = false;
        let mut filter_satisfied = false;

        if let Some(categories) = &trigger.error_categories {
            any_filter_configured = true;
            let count = subset.iter().filter(|e| categories.contains(&e.classification.category)).count();
            filter_satisfied |= count >= trigger.threshold_count;
        }
        if let Some(severities) = &trigger.error_severities {
            any_filter_configured = true;
            let count = subset.iter().filter(|e| severities.contains(&e.classification.severity)).count();
            filter_satisfied |= count >= trigger.threshold_count;
        }
        if let Some(patterns) = &trigger.error_patterns {
            any_filter_configured = true;
            let count = subset
                .iter()
                .filter(|e| {
                    let message = e.message.to_lowercase();
                    patterns.iter().any(|p| message.contains(&p.to_lowercase()))
                })
                .count();
            filter_satisfied |= count >= trigger.threshold_count;
        }

        !any_filter_configured || filter_satisfied
    }

    /// Drop every history entry inside `trigger`'s window, so a workflow
    /// that just fired doesn't immediately fire again on the same errors.
    fn clear_triggered_history(&self, trigger: &WorkflowTrigger) {
        let now = self.clock.now_millis();
        let window_start = now.saturating_sub(trigger.time_window.as_millis() as u64);
        self.error_history.lock().unwrap().retain(|e| e.at_millis < window_start);
    }

    /// Run `name`'s workflow immediately, regardless of trigger state.
    /// Returns `None` if no workflow is registered under that name.
    pub async fn execute_workflow(&self, name: &str) -> Option<ExecutionRecord> {
        let workflow = self.workflows.lock().unwrap().get(name).cloned()?;
        let id = uuid::Uuid::new_v4();
        let started_at_millis = self.clock.now_millis();
        self.publisher.publish(WorkflowEvent::Started { workflow: name.to_string(), started_at_millis });

        self.executions.lock().unwrap().push(ExecutionRecord {
            id,
            workflow_name: name.to_string(),
            started_at_millis,
            ended_at_millis: None,
            status: WorkflowStatus::Running,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            error: None,
        });

        let retry: RetryPolicy<StepError> = RetryPolicy::builder().max_attempts(workflow.max_retries).build();

        let mut completed_steps: Vec<String> = Vec::new();
        let mut failed_steps: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;
        let mut stopped_on_failure = false;

        let run_steps = async {
            for step in &workflow.steps {
                match run_step(step, &retry).await {
                    Ok(()) => completed_steps.push(step.name.clone()),
                    Err(message) => {
                        failed_steps.push(step.name.clone());
                        last_error = Some(message);
                        if let Some(rollback) = &step.rollback {
                            tracing::warn!(workflow = name, step = %step.name, "step failed, invoking rollback");
                            (rollback)().await;
                        }
                        if !step.continue_on_failure {
                            stopped_on_failure = true;
                            break;
                        }
                    }
                }
            }
        };

        let timed_out = tokio::time::timeout(workflow.timeout, run_steps).await.is_err();
        let ended_at_millis = self.clock.now_millis();
        let duration_ms = ended_at_millis.saturating_sub(started_at_millis);

        if timed_out {
            last_error.get_or_insert_with(|| format!("workflow execution timeout after {}ms", workflow.timeout.as_millis()));
        }

        let status = if timed_out {
            WorkflowStatus::Failed
        } else if failed_steps.is_empty() {
            WorkflowStatus::Success
        } else if !completed_steps.is_empty() && !stopped_on_failure {
            WorkflowStatus::Partial
        } else {
            WorkflowStatus::Failed
        };

        let outcome = match status {
            WorkflowStatus::Success => RecoveryOutcome::Success,
            WorkflowStatus::Partial => RecoveryOutcome::Partial,
            WorkflowStatus::Failed => RecoveryOutcome::Failed,
            WorkflowStatus::Running => unreachable!("status is always resolved by this point"),
        };

        self.metrics.record_recovery_execution(outcome, (outcome == RecoveryOutcome::Success).then_some(duration_ms));
        self.publisher.publish(WorkflowEvent::Completed { workflow: name.to_string(), outcome, duration_ms });

        match status {
            WorkflowStatus::Success => tracing::info!(workflow = name, duration_ms, "recovery workflow succeeded"),
            WorkflowStatus::Partial => {
                tracing::warn!(workflow = name, completed = completed_steps.len(), failed = failed_steps.len(), "recovery workflow partially completed")
            }
            WorkflowStatus::Failed => tracing::error!(workflow = name, timed_out, error = ?last_error, "recovery workflow failed"),
            WorkflowStatus::Running => unreachable!("status is always resolved by this point"),
        }

        let mut executions = self.executions.lock().unwrap();
        let record = executions.iter_mut().find(|e| e.id == id)?;
        record.ended_at_millis = Some(ended_at_millis);
        record.status = status;
        record.completed_steps = completed_steps;
        record.failed_steps = failed_steps;
        record.error = last_error;
        Some(record.clone())
    }

    /// Evaluate every registered workflow's trigger against current
    /// history, executing and clearing matching history for any that
    /// fire.
    async fn check_triggers(self: &Arc<Self>) {
        let due: Vec<String> = {
            let workflows = self.workflows.lock().unwrap();
            workflows.values().filter(|w| self.should_trigger(&w.trigger)).map(|w| w.name.clone()).collect()
        };

        for name in due {
            let trigger = self.workflows.lock().unwrap().get(&name).map(|w| w.trigger.clone());
            if let Some(trigger) = trigger {
                tracing::info!(workflow = %name, "recovery trigger threshold reached, auto-executing");
                self.execute_workflow(&name).await;
                self.clear_triggered_history(&trigger);
            }
        }
    }

    /// Start a background task that polls trigger conditions every
    /// `interval`. Replaces any previously running monitor.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) {
        self.shutdown.store(false, Ordering::SeqCst);
        let engine = self.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                engine.check_triggers().await;
            }
        });
        *self.monitor_handle.lock().unwrap() = Some(handle);
    }

    /// Stop the background monitor, if one is running.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Run one step's action (wrapped in `retry`), then its validation if
/// present. Returns the failure message on either a retry-exhausted
/// action or a failed validation.
async fn run_step(step: &Step, retry: &RetryPolicy<StepError>) -> Result<(), String> {
    let action = step.action.clone();
    let result = retry.execute(move || {
        let action = action.clone();
        async move { (action)().await.map_err(CoreError::Inner) }
    })
    .await;

    match result {
        Ok(()) => {
            if let Some(validation) = &step.validation {
                if !(validation)().await {
                    return Err(format!("Validation failed for step: {}", step.name));
                }
            }
            Ok(())
        }
        Err(CoreError::Inner(e)) => Err(e.to_string()),
        Err(other) => Err(other.to_string()),
    }
}

/// Fluent constructor for [`WorkflowEngine`], since the engine is always
/// handed out wrapped in an `Arc` (the background monitor needs to clone
/// a handle to itself).
pub struct WorkflowEngineBuilder {
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    metrics: MetricsRegistry,
}

impl WorkflowEngineBuilder {
    fn new() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::default()),
            publisher: Arc::new(BroadcastPublisher::default()),
            metrics: MetricsRegistry::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Arc<WorkflowEngine> {
        Arc::new(WorkflowEngine {
            workflows: Mutex::new(HashMap::new()),
            error_history: Mutex::new(Vec::new()),
            executions: Mutex::new(Vec::new()),
            pattern_counts: Mutex::new(HashMap::new()),
            clock: self.clock,
            publisher: self.publisher,
            metrics: self.metrics,
            monitor_handle: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    struct ProbeError(&'static str);
    impl std::fmt::Display for ProbeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for ProbeError {}

    fn boxed(message: &'static str) -> StepError {
        Box::new(ProbeError(message))
    }

    #[tokio::test]
    async fn execute_workflow_runs_steps_in_order_and_reports_success() {
        let engine = WorkflowEngine::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();

        engine.register_workflow(RecoveryWorkflow::new(
            "reconnect",
            WorkflowTrigger::default(),
            vec![
                Step::new("drain", move || {
                    o1.lock().unwrap().push("drain");
                    async { Ok(()) }
                }),
                Step::new("reconnect", move || {
                    o2.lock().unwrap().push("reconnect");
                    async { Ok(()) }
                }),
            ],
        ));

        let record = engine.execute_workflow("reconnect").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Success);
        assert_eq!(record.completed_steps, vec!["drain", "reconnect"]);
        assert!(record.failed_steps.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["drain", "reconnect"]);
    }

    #[tokio::test]
    async fn continue_on_failure_step_reports_partial() {
        let engine = WorkflowEngine::new();
        engine.register_workflow(
            RecoveryWorkflow::new(
                "partial",
                WorkflowTrigger::default(),
                vec![
                    Step::new("ok", || async { Ok(()) }),
                    Step::new("flaky", || async { Err(boxed("validation error: bad input")) }).continue_on_failure(true),
                    Step::new("last", || async { Ok(()) }),
                ],
            )
            .with_max_retries(1),
        );

        let record = engine.execute_workflow("partial").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Partial);
        assert_eq!(record.completed_steps, vec!["ok", "last"]);
        assert_eq!(record.failed_steps, vec!["flaky"]);
    }

    #[tokio::test]
    async fn stop_on_failure_with_prior_success_reports_failed_not_partial() {
        let engine = WorkflowEngine::new();
        engine.register_workflow(
            RecoveryWorkflow::new(
                "stops",
                WorkflowTrigger::default(),
                vec![
                    Step::new("ok", || async { Ok(()) }),
                    Step::new("fails", || async { Err(boxed("validation error: bad input")) }),
                    Step::new("never", || async { Ok(()) }),
                ],
            )
            .with_max_retries(1),
        );

        let record = engine.execute_workflow("stops").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.completed_steps, vec!["ok"]);
        assert_eq!(record.failed_steps, vec!["fails"]);
    }

    #[tokio::test]
    async fn failed_step_triggers_rollback_exactly_once() {
        let engine = WorkflowEngine::new();
        let rollback_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let rollback_calls2 = rollback_calls.clone();

        engine.register_workflow(
            RecoveryWorkflow::new(
                "rolls-back",
                WorkflowTrigger::default(),
                vec![Step::new("fails", || async { Err(boxed("validation error: bad input")) })
                    .rollback(move || {
                        rollback_calls2.fetch_add(1, Ordering::SeqCst);
                        async {}
                    })],
            )
            .with_max_retries(1),
        );

        let record = engine.execute_workflow("rolls-back").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(rollback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_validation_fails_the_step_with_its_own_message() {
        let engine = WorkflowEngine::new();
        engine.register_workflow(
            RecoveryWorkflow::new(
                "validates",
                WorkflowTrigger::default(),
                vec![Step::new("check", || async { Ok(()) }).validation(|| async { false })],
            )
            .with_max_retries(1),
        );

        let record = engine.execute_workflow("validates").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Validation failed for step: check"));
    }

    #[tokio::test]
    async fn step_action_is_retried_up_to_max_retries() {
        let engine = WorkflowEngine::new();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let attempts2 = attempts.clone();

        engine.register_workflow(
            RecoveryWorkflow::new(
                "retries",
                WorkflowTrigger::default(),
                vec![Step::new("flaky", move || {
                    let n = attempts2.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err(boxed("timeout calling upstream")) } else { Ok(()) } }
                })],
            )
            .with_max_retries(3),
        );

        let record = engine.execute_workflow("retries").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_workflow_returns_none() {
        let engine = WorkflowEngine::new();
        assert!(engine.execute_workflow("missing").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_failed_outcome_with_timeout_message() {
        let engine = WorkflowEngine::new();
        engine.register_workflow(
            RecoveryWorkflow::new(
                "slow",
                WorkflowTrigger::default(),
                vec![Step::new("hangs", || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                })],
            )
            .with_timeout(Duration::from_millis(50)),
        );

        let record = engine.execute_workflow("slow").await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("timeout"));
    }

    #[test]
    fn record_error_prunes_entries_older_than_one_hour() {
        let clock = Arc::new(ManualClock::new());
        let engine = WorkflowEngine::with_clock(clock.clone());

        engine.record_error(&boxed("network error"));
        clock.advance(ONE_HOUR_MS + 1);
        engine.record_error(&boxed("timeout calling upstream"));

        let trigger = WorkflowTrigger { threshold_count: 1, time_window: Duration::from_millis(ONE_HOUR_MS * 2), ..WorkflowTrigger::default() };
        assert!(engine.should_trigger(&trigger));
        assert_eq!(engine.error_history.lock().unwrap().len(), 1);
    }

    #[test]
    fn record_error_bumps_pattern_counters() {
        let engine = WorkflowEngine::new();
        engine.record_error(&boxed("network error"));
        engine.record_error(&boxed("network error"));
        engine.record_error(&boxed("408 timeout"));

        let counts = engine.pattern_counts();
        assert_eq!(counts.get("network"), Some(&2));
        assert_eq!(counts.get("timeout"), Some(&1));
    }

    #[test]
    fn trigger_fires_on_category_match_count() {
        let clock = Arc::new(ManualClock::new());
        let engine = WorkflowEngine::with_clock(clock.clone());

        engine.record_error(&boxed("network error"));
        engine.record_error(&boxed("network error"));
        engine.record_error(&boxed("408 timeout"));

        let trigger = WorkflowTrigger {
            error_categories: Some(vec![Category::Network]),
            threshold_count: 2,
            time_window: Duration::from_secs(60),
            ..WorkflowTrigger::default()
        };
        assert!(engine.should_trigger(&trigger));

        clock.advance(61_000);
        assert!(!engine.should_trigger(&trigger));
    }

    #[test]
    fn trigger_fires_on_severity_or_pattern_when_category_misses() {
        let engine = WorkflowEngine::new();
        engine.record_error(&boxed("401 unauthorized"));
        engine.record_error(&boxed("403 forbidden"));

        // Category filter alone wouldn't match ("network"), but severity
        // does (both errors classify High), so the OR condition still fires.
        let trigger = WorkflowTrigger {
            error_categories: Some(vec![Category::Network]),
            error_severities: Some(vec![Severity::High]),
            threshold_count: 2,
            time_window: Duration::from_secs(60),
            ..WorkflowTrigger::default()
        };
        assert!(engine.should_trigger(&trigger));

        let pattern_trigger = WorkflowTrigger {
            error_patterns: Some(vec!["forbidden".to_string()]),
            threshold_count: 1,
            time_window: Duration::from_secs(60),
            ..WorkflowTrigger::default()
        };
        assert!(engine.should_trigger(&pattern_trigger));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_auto_executes_workflow_once_threshold_is_reached() {
        let clock = Arc::new(ManualClock::new());
        let engine = WorkflowEngine::with_clock(clock.clone());
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();

        engine.register_workflow(RecoveryWorkflow::new(
            "auto",
            WorkflowTrigger {
                error_categories: Some(vec![Category::Network]),
                threshold_count: 2,
                time_window: Duration::from_secs(60),
                ..WorkflowTrigger::default()
            },
            vec![Step::new("heal", move || {
                ran2.store(true, Ordering::SeqCst);
                async { Ok(()) }
            })],
        ));

        engine.record_error(&boxed("network error"));
        engine.record_error(&boxed("network error"));

        engine.spawn_monitor(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;

        assert!(ran.load(Ordering::SeqCst));
        engine.shutdown();
    }

    #[tokio::test]
    async fn broadcast_publisher_delivers_started_and_completed_events() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut rx = publisher.subscribe();
        let engine = WorkflowEngine::builder().publisher(publisher).build();

        engine.register_workflow(RecoveryWorkflow::new(
            "reconnect",
            WorkflowTrigger::default(),
            vec![Step::new("ok", || async { Ok(()) })],
        ));
        engine.execute_workflow("reconnect").await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, WorkflowEvent::Started { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, WorkflowEvent::Completed { outcome: RecoveryOutcome::Success, .. }));
    }

    #[tokio::test]
    async fn execution_history_and_active_executions_are_tracked() {
        let engine = WorkflowEngine::new();
        engine.register_workflow(RecoveryWorkflow::new(
            "reconnect",
            WorkflowTrigger::default(),
            vec![Step::new("ok", || async { Ok(()) })],
        ));

        assert!(engine.get_active_executions().is_empty());
        engine.execute_workflow("reconnect").await;
        engine.execute_workflow("reconnect").await;

        assert!(engine.get_active_executions().is_empty());
        let history = engine.get_execution_history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(engine.get_execution_history(10).len(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_monitor_task() {
        let engine = WorkflowEngine::new();
        engine.spawn_monitor(Duration::from_millis(5));
        engine.shutdown();
        assert!(engine.monitor_handle.lock().unwrap().is_none());
    }
}
