//! Compliance validation and audit subsystem
//!
//! A pluggable rule engine scores a caller-assembled context against
//! registered rules. Results can be recorded in a per-subject, hash-chained
//! audit log and as trend snapshots, both persisted through a minimal
//! key-value store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use compliancectl_lib::{
//!     AuditLogger, CachedValidator, FnRule, MemoryStore, RuleRegistry, Severity, TrendTracker,
//!     ValidationContext, ValidationEngine, ValidationIssue,
//! };
//!
//! # fn main() -> Result<(), compliancectl_lib::ComplianceError> {
//! let mut registry = RuleRegistry::new();
//! registry.register(FnRule::new("units-present", "dq", Severity::Warning, |ctx| {
//!     let missing = ctx.field("missingUnits").and_then(|v| v.as_u64()).unwrap_or(0);
//!     Ok((0..missing)
//!         .map(|i| ValidationIssue::new(format!("unit-{}", i), "dq", Severity::Warning, "data-quality", "Unit missing"))
//!         .collect())
//! }));
//!
//! let validator = CachedValidator::new(Arc::new(ValidationEngine::new(registry)));
//! let result = validator.validate("dq", &ValidationContext::new(serde_json::json!({ "missingUnits": 2 })));
//!
//! let store = Arc::new(MemoryStore::new());
//! AuditLogger::new(store.clone()).log_validation_run("study-1", "schema", &result)?;
//! TrendTracker::new(store).record_snapshot("study-1", &[result], Some("v1"))?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
mod sync;
pub mod trend;

pub use audit::{AuditLogger, EntryHasher, HashAlgorithm, IntegrityReport};
pub use config::ComplianceConfig;
pub use engine::{
    CachedValidator, DebouncedValidator, FnRule, RuleError, RuleRegistry, ValidationEngine, ValidationRule,
};
pub use error::{ComplianceError, ComplianceResult, StoreError};
pub use models::*;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use trend::TrendTracker;
