use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::models::{ValidationContext, ValidationResult};
use crate::sync::lock;
use super::validator::SharedEngine;

/// Default time-to-live for cached results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedResult {
    result: ValidationResult,
    stored_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedResult>>>;

/// Engine front door that reuses recent results
///
/// Each cache key owns a slot lock. Concurrent callers for one key queue on
/// that slot, so only the first runs the engine and the rest read its result.
#[derive(Debug)]
pub struct CachedValidator {
    engine: SharedEngine,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl CachedValidator {
    pub fn new(engine: SharedEngine) -> Self {
        Self::with_ttl(engine, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(engine: SharedEngine, ttl: Duration) -> Self {
        Self {
            engine,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Validate through the cache using the context fingerprint as key
    pub fn validate(&self, group_id: &str, context: &ValidationContext) -> ValidationResult {
        self.validate_with_key(group_id, context, None)
    }

    /// Validate through the cache, optionally under a caller-chosen key
    pub fn validate_with_key(
        &self,
        group_id: &str,
        context: &ValidationContext,
        cache_key: Option<&str>,
    ) -> ValidationResult {
        let key = match cache_key {
            Some(key) => key.to_string(),
            None => cache_key_for(group_id, context),
        };

        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut cached = lock(&slot);
        if let Some(entry) = cached.as_ref() {
            if entry.stored_at.elapsed() < self.ttl {
                tracing::debug!(group_id, cache_key = %key, "Validation cache hit");
                return entry.result.clone();
            }
        }

        tracing::debug!(group_id, cache_key = %key, "Validation cache miss");
        let result = self.engine.evaluate(group_id, context);
        *cached = Some(CachedResult {
            result: result.clone(),
            stored_at: Instant::now(),
        });
        result
    }

    /// Drop every cached result
    pub fn clear_cache(&self) {
        lock(&self.slots).clear();
    }

    /// Drop results older than the TTL; returns how many were removed
    pub fn clear_expired_cache(&self) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| match lock(slot).as_ref() {
            Some(entry) => entry.stored_at.elapsed() < self.ttl,
            None => false,
        });
        before - slots.len()
    }

    /// Number of populated cache entries
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 over the group id and the context fingerprint
pub fn cache_key_for(group_id: &str, context: &ValidationContext) -> String {
    let material = serde_json::json!({
        "groupId": group_id,
        "context": context.fingerprint(),
    });

    let mut hasher = Sha256::new();
    hasher.update(material.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FnRule, RuleRegistry, ValidationEngine};
    use crate::models::{Severity, ValidationIssue};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_engine(calls: Arc<AtomicUsize>, delay: Duration) -> SharedEngine {
        let mut registry = RuleRegistry::new();
        registry.register(FnRule::new("counted", "dq", Severity::Warning, move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            let count = ctx.field("count").and_then(|c| c.as_i64()).unwrap_or(0);
            Ok((0..count)
                .map(|i| ValidationIssue::new(format!("w{}", i), "dq", Severity::Warning, "data-quality", "w"))
                .collect())
        }));
        Arc::new(ValidationEngine::new(registry))
    }

    #[test]
    fn test_identical_calls_hit_engine_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValidator::new(counting_engine(Arc::clone(&calls), Duration::ZERO));
        let context = ValidationContext::new(json!({"count": 2}));

        let first = cache.validate("dq", &context);
        let second = cache.validate("dq", &context);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_fingerprints_miss() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValidator::new(counting_engine(Arc::clone(&calls), Duration::ZERO));

        cache.validate("dq", &ValidationContext::new(json!({"count": 1})));
        cache.validate("dq", &ValidationContext::new(json!({"count": 2})));
        cache.validate("other", &ValidationContext::new(json!({"count": 2})));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_expired_entries_reevaluate_and_sweep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValidator::with_ttl(counting_engine(Arc::clone(&calls), Duration::ZERO), Duration::from_millis(20));
        let context = ValidationContext::new(json!({"count": 1}));

        cache.validate("dq", &context);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.clear_expired_cache(), 1);
        assert!(cache.is_empty());

        cache.validate("dq", &context);
        thread::sleep(Duration::from_millis(40));
        cache.validate("dq", &context);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clear_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValidator::new(counting_engine(Arc::clone(&calls), Duration::ZERO));
        let context = ValidationContext::new(json!({"count": 1}));

        cache.validate("dq", &context);
        cache.clear_cache();
        cache.validate("dq", &context);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_explicit_cache_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachedValidator::new(counting_engine(Arc::clone(&calls), Duration::ZERO));

        let a = cache.validate_with_key("dq", &ValidationContext::new(json!({"count": 1})), Some("form-1"));
        let b = cache.validate_with_key("dq", &ValidationContext::new(json!({"count": 4})), Some("form-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.warning_count, b.warning_count);
    }

    #[test]
    fn test_concurrent_callers_share_one_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CachedValidator::new(counting_engine(Arc::clone(&calls), Duration::from_millis(30))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.validate("dq", &ValidationContext::new(json!({"count": 3}))))
            })
            .collect();

        let results: Vec<ValidationResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.warning_count == 3));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let context = ValidationContext::new(json!({"records": [1, 2]})).with_frameworks(["FDA", "EMA"]);
        let reordered = ValidationContext::new(json!({"records": [3, 4]})).with_frameworks(["EMA", "FDA"]);
        assert_eq!(cache_key_for("dq", &context), cache_key_for("dq", &reordered));
        assert_ne!(cache_key_for("dq", &context), cache_key_for("irb", &context));
        assert_eq!(cache_key_for("dq", &context).len(), 64);
    }
}
