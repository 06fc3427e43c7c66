use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{ComplianceError, ComplianceResult};
use crate::models::{ValidationContext, ValidationResult};
use crate::sync::lock;
use super::validator::SharedEngine;

/// Default quiet period before a debounced run fires
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

struct PendingRun {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRun>>>;

/// Collapses bursts of validation requests into one engine run per key
///
/// Every submission schedules a task on the tokio runtime that sleeps for the
/// quiet period and then evaluates on the blocking pool. A newer submission for
/// the same key aborts the older task, so only the last call in a burst reaches
/// the engine.
pub struct DebouncedValidator {
    engine: SharedEngine,
    delay: Duration,
    runtime: Handle,
    pending: PendingMap,
    next_generation: AtomicU64,
}

impl DebouncedValidator {
    /// Create a debouncer on the current tokio runtime
    pub fn new(engine: SharedEngine, delay: Duration) -> ComplianceResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ComplianceError::NoRuntime)?;
        Ok(Self::with_handle(engine, delay, runtime))
    }

    /// Create a debouncer that schedules on `runtime`
    pub fn with_handle(engine: SharedEngine, delay: Duration, runtime: Handle) -> Self {
        Self {
            engine,
            delay,
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule a run keyed by the group id
    pub fn submit<F>(&self, group_id: &str, context: ValidationContext, callback: F)
    where
        F: FnOnce(ValidationResult) + Send + 'static,
    {
        self.submit_keyed(group_id, group_id, context, callback);
    }

    /// Schedule a run under an explicit debounce key, superseding any
    /// pending run for that key
    pub fn submit_keyed<F>(&self, key: &str, group_id: &str, context: ValidationContext, callback: F)
    where
        F: FnOnce(ValidationResult) + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(&self.engine);
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        let task_key = key.to_string();
        let group_id = group_id.to_string();

        let mut runs = lock(&self.pending);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut runs = lock(&pending);
                match runs.get(&task_key) {
                    Some(run) if run.generation == generation => {
                        runs.remove(&task_key);
                    }
                    _ => return,
                }
            }

            let outcome = tokio::task::spawn_blocking(move || engine.evaluate(&group_id, &context)).await;
            match outcome {
                Ok(result) => callback(result),
                Err(error) => tracing::warn!(debounce_key = %task_key, %error, "Debounced validation did not complete"),
            }
        });

        if let Some(previous) = runs.insert(key.to_string(), PendingRun { generation, handle }) {
            previous.handle.abort();
            tracing::debug!(debounce_key = key, "Superseded pending validation");
        }
    }

    /// Cancel the pending run for `key`; returns whether one was pending
    pub fn cancel(&self, key: &str) -> bool {
        match lock(&self.pending).remove(key) {
            Some(run) => {
                run.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of keys with a scheduled run
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Drop for DebouncedValidator {
    fn drop(&mut self) {
        for (_, run) in lock(&self.pending).drain() {
            run.handle.abort();
        }
    }
}

impl std::fmt::Debug for DebouncedValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedValidator")
            .field("delay", &self.delay)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FnRule, RuleRegistry, ValidationEngine};
    use crate::models::{Severity, ValidationIssue};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn engine(calls: Arc<AtomicUsize>) -> SharedEngine {
        let mut registry = RuleRegistry::new();
        registry.register(FnRule::new("count", "dq", Severity::Info, move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            let count = ctx.field("count").and_then(|c| c.as_i64()).unwrap_or(0);
            Ok((0..count)
                .map(|i| ValidationIssue::new(format!("i{}", i), "dq", Severity::Info, "data-quality", "i"))
                .collect())
        }));
        Arc::new(ValidationEngine::new(registry))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_last_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debouncer = DebouncedValidator::new(engine(Arc::clone(&calls)), Duration::from_millis(500)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for count in 1..=3 {
            let tx = tx.clone();
            debouncer.submit("dq", ValidationContext::new(json!({"count": count})), move |result| {
                let _ = tx.send(result);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(debouncer.pending_count(), 1);

        let result = rx.recv().await.unwrap();
        assert_eq!(result.info_count, 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_keys_run_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debouncer = DebouncedValidator::new(engine(Arc::clone(&calls)), Duration::from_millis(50)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for key in ["form-a", "form-b"] {
            let tx = tx.clone();
            debouncer.submit_keyed(key, "dq", ValidationContext::new(json!({"count": 1})), move |result| {
                let _ = tx.send(result);
            });
        }

        assert_eq!(rx.recv().await.unwrap().info_count, 1);
        assert_eq!(rx.recv().await.unwrap().info_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_rule_runs_off_the_runtime_thread() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let mut registry = RuleRegistry::new();
        registry.register(FnRule::new("blocking", "dq", Severity::Info, move |_| {
            let _ = started_tx.send(());
            let _ = lock(&release_rx).recv();
            Ok(Vec::new())
        }));
        let debouncer =
            DebouncedValidator::new(Arc::new(ValidationEngine::new(registry)), Duration::from_millis(10)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        debouncer.submit("dq", ValidationContext::default(), move |result| {
            let _ = tx.send(result);
        });

        // the current-thread runtime is free while the rule blocks
        started_rx.recv().await.unwrap();
        release_tx.send(()).unwrap();
        assert_eq!(rx.recv().await.unwrap().compliance_score, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debouncer = DebouncedValidator::new(engine(Arc::clone(&calls)), Duration::from_millis(50)).unwrap();

        debouncer.submit("dq", ValidationContext::default(), |_| {});
        assert!(debouncer.cancel("dq"));
        assert!(!debouncer.cancel("dq"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = DebouncedValidator::new(engine(calls), DEFAULT_DEBOUNCE_DELAY);
        assert!(matches!(result, Err(ComplianceError::NoRuntime)));
    }
}
