use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::rule::ValidationRule;

/// Registry of validation rules keyed by unique id
///
/// Iteration follows registration order. Registering an id that already
/// exists replaces the rule in its original slot.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<dyn ValidationRule>>,
    index: HashMap<String, usize>,
}

/// Rule counts by group, severity and category
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
    pub total_rules: usize,
    pub by_group: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

impl RuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, overwriting any rule with the same id
    pub fn register<R: ValidationRule + 'static>(&mut self, rule: R) {
        self.register_arc(Arc::new(rule));
    }

    /// Register an already shared rule
    pub fn register_arc(&mut self, rule: Arc<dyn ValidationRule>) {
        let id = rule.id().to_string();
        match self.index.get(&id) {
            Some(&slot) => {
                tracing::debug!(rule_id = %id, "Replacing registered rule");
                self.rules[slot] = rule;
            }
            None => {
                self.index.insert(id, self.rules.len());
                self.rules.push(rule);
            }
        }
    }

    /// Register many rules in order
    pub fn register_all<I>(&mut self, rules: I)
    where
        I: IntoIterator<Item = Arc<dyn ValidationRule>>,
    {
        for rule in rules {
            self.register_arc(rule);
        }
    }

    /// Get a rule by id
    pub fn get(&self, rule_id: &str) -> Option<Arc<dyn ValidationRule>> {
        self.index.get(rule_id).map(|&slot| Arc::clone(&self.rules[slot]))
    }

    /// All rules owned by `group_id`, in registration order
    pub fn rules_for_group(&self, group_id: &str) -> Vec<Arc<dyn ValidationRule>> {
        self.rules
            .iter()
            .filter(|rule| rule.group_id() == group_id)
            .cloned()
            .collect()
    }

    /// All registered rules, in registration order
    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn ValidationRule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Remove every rule
    pub fn clear(&mut self) {
        self.rules.clear();
        self.index.clear();
    }

    /// Count rules by group, severity and category
    pub fn summary(&self) -> RuleSummary {
        let mut summary = RuleSummary {
            total_rules: self.rules.len(),
            ..RuleSummary::default()
        };

        for rule in &self.rules {
            *summary.by_group.entry(rule.group_id().to_string()).or_default() += 1;
            *summary.by_severity.entry(rule.severity().to_string()).or_default() += 1;
            *summary.by_category.entry(rule.category().to_string()).or_default() += 1;
        }

        summary
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rule_ids", &self.rules.iter().map(|r| r.id()).collect::<Vec<_>>())
            .finish()
    }
}
