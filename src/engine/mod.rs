// Validation Engine Module
// Rule registry, rule execution and scoring, plus the cached and debounced front doors

pub mod cache;
pub mod debounce;
pub mod registry;
pub mod rule;
pub mod validator;

pub use cache::{cache_key_for, CachedValidator, DEFAULT_CACHE_TTL};
pub use debounce::{DebouncedValidator, DEFAULT_DEBOUNCE_DELAY};
pub use registry::{RuleRegistry, RuleSummary};
pub use rule::{CheckFn, FnRule, RuleError, RuleOutcome, ValidationRule};
pub use validator::{SharedEngine, ValidationEngine};
