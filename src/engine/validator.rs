use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::models::{IssueLocation, QuickStatus, Severity, ValidationContext, ValidationIssue, ValidationResult};
use super::registry::RuleRegistry;
use super::rule::{RuleError, ValidationRule};

/// Runs registered rules against a context and scores the outcome
#[derive(Debug, Default)]
pub struct ValidationEngine {
    registry: RuleRegistry,
}

impl ValidationEngine {
    /// Create an engine over a populated registry
    pub fn new(registry: RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    /// Evaluate all rules of `group_id` against `context`
    pub fn evaluate(&self, group_id: &str, context: &ValidationContext) -> ValidationResult {
        self.evaluate_with(group_id, context, None)
    }

    /// Evaluate an explicit list of rule ids (unknown ids are skipped), or
    /// the whole group when `rule_ids` is `None`
    pub fn evaluate_with(
        &self,
        group_id: &str,
        context: &ValidationContext,
        rule_ids: Option<&[String]>,
    ) -> ValidationResult {
        let started = Instant::now();

        let candidates: Vec<Arc<dyn ValidationRule>> = match rule_ids {
            Some(ids) => ids.iter().filter_map(|id| self.registry.get(id)).collect(),
            None => self.registry.rules_for_group(group_id),
        };

        let mut issues = Vec::new();
        for rule in candidates.iter().filter(|rule| rule.applies_to(context)) {
            match run_rule(rule.as_ref(), context) {
                Ok(found) => issues.extend(found),
                Err(error) => {
                    tracing::warn!(rule_id = %rule.id(), group_id, %error, "Validation rule failed");
                    issues.push(rule_failure_issue(group_id, rule.as_ref()));
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = ValidationResult::from_issues(group_id, issues, elapsed_ms);
        tracing::debug!(
            group_id,
            score = result.compliance_score,
            critical = result.critical_count,
            warning = result.warning_count,
            "Validation complete"
        );
        result
    }

    /// Evaluate several groups against the same context
    pub fn evaluate_all(&self, group_ids: &[&str], context: &ValidationContext) -> BTreeMap<String, ValidationResult> {
        group_ids
            .iter()
            .map(|group_id| (group_id.to_string(), self.evaluate(group_id, context)))
            .collect()
    }

    /// Low-latency badge status from the group's critical rules only
    pub fn quick_status(&self, group_id: &str, context: &ValidationContext) -> QuickStatus {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let issues: Vec<ValidationIssue> = self
                .registry
                .rules_for_group(group_id)
                .iter()
                .filter(|rule| rule.severity() == Severity::Critical)
                .filter_map(|rule| run_rule(rule.as_ref(), context).ok())
                .flatten()
                .collect();

            if issues.iter().any(|i| i.severity == Severity::Critical) {
                QuickStatus::Error
            } else if issues.iter().any(|i| i.severity == Severity::Warning) {
                QuickStatus::Warning
            } else {
                QuickStatus::Pass
            }
        }));

        outcome.unwrap_or(QuickStatus::Unknown)
    }
}

impl From<RuleRegistry> for ValidationEngine {
    fn from(registry: RuleRegistry) -> Self {
        Self::new(registry)
    }
}

/// Run one rule, converting a panic into a rule error
fn run_rule(rule: &dyn ValidationRule, context: &ValidationContext) -> Result<Vec<ValidationIssue>, RuleError> {
    match panic::catch_unwind(AssertUnwindSafe(|| rule.check(context))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "rule panicked".to_string());
            Err(RuleError::Failed(message))
        }
    }
}

fn rule_failure_issue(group_id: &str, rule: &dyn ValidationRule) -> ValidationIssue {
    ValidationIssue::new(format!("error-{}", rule.id()), group_id, Severity::Warning, "regulatory", "Validation Rule Error")
        .with_description(format!("Rule \"{}\" encountered an error during execution", rule.name()))
        .with_recommendation("Please report this issue to support")
        .with_location(IssueLocation::module("system"))
}

/// Share one engine between the cache, debouncer and callers
pub type SharedEngine = Arc<ValidationEngine>;
