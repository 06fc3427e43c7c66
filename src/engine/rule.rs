use crate::models::{Severity, ValidationContext, ValidationIssue};

/// Failure raised by a rule while inspecting a context
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Required context field '{0}' is missing")]
    MissingField(String),

    #[error("Context field '{field}' has unexpected shape: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Outcome of a single rule check
pub type RuleOutcome = Result<Vec<ValidationIssue>, RuleError>;

/// Contract every policy rule satisfies
///
/// Rules must be pure: `check` may not mutate shared state and must return
/// the same issues for the same context.
pub trait ValidationRule: Send + Sync {
    /// Globally unique rule id
    fn id(&self) -> &str;

    /// Human-readable name, used in synthetic failure issues
    fn name(&self) -> &str {
        self.id()
    }

    /// Owning rule group
    fn group_id(&self) -> &str;

    fn category(&self) -> &str;

    fn severity(&self) -> Severity;

    /// Subject kinds this rule applies to; `None` applies to all
    fn applicable_subject_kinds(&self) -> Option<&[String]> {
        None
    }

    /// Regulatory frameworks this rule belongs to; `None` applies to all
    fn regulatory_frameworks(&self) -> Option<&[String]> {
        None
    }

    fn check(&self, context: &ValidationContext) -> RuleOutcome;

    /// Whether the rule should run for `context`
    ///
    /// A context that declares no subject kind (or no frameworks) does not
    /// filter on that axis.
    fn applies_to(&self, context: &ValidationContext) -> bool {
        if let (Some(kinds), Some(kind)) = (self.applicable_subject_kinds(), context.subject_kind.as_deref()) {
            if !kinds.iter().any(|k| k == kind) {
                return false;
            }
        }

        if let Some(frameworks) = self.regulatory_frameworks() {
            if !context.active_frameworks.is_empty()
                && !frameworks.iter().any(|f| context.active_frameworks.contains(f))
            {
                return false;
            }
        }

        true
    }
}

/// Closure type backing a [`FnRule`]
pub type CheckFn = Box<dyn Fn(&ValidationContext) -> RuleOutcome + Send + Sync>;

/// Rule defined as metadata plus a check closure
pub struct FnRule {
    id: String,
    name: String,
    group_id: String,
    category: String,
    severity: Severity,
    subject_kinds: Option<Vec<String>>,
    frameworks: Option<Vec<String>>,
    check: CheckFn,
}

impl FnRule {
    pub fn new<F>(id: impl Into<String>, group_id: impl Into<String>, severity: Severity, check: F) -> Self
    where
        F: Fn(&ValidationContext) -> RuleOutcome + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            group_id: group_id.into(),
            category: "general".to_string(),
            severity,
            subject_kinds: None,
            frameworks: None,
            check: Box::new(check),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn for_subject_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn for_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = Some(frameworks.into_iter().map(Into::into).collect());
        self
    }
}

impl std::fmt::Debug for FnRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRule")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("severity", &self.severity)
            .field("subject_kinds", &self.subject_kinds)
            .field("frameworks", &self.frameworks)
            .finish()
    }
}

impl ValidationRule for FnRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn applicable_subject_kinds(&self) -> Option<&[String]> {
        self.subject_kinds.as_deref()
    }

    fn regulatory_frameworks(&self) -> Option<&[String]> {
        self.frameworks.as_deref()
    }

    fn check(&self, context: &ValidationContext) -> RuleOutcome {
        (self.check)(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(id: &str) -> FnRule {
        FnRule::new(id, "g", Severity::Warning, |_| Ok(Vec::new()))
    }

    #[test]
    fn test_unfiltered_rule_applies_everywhere() {
        let rule = noop("r");
        assert!(rule.applies_to(&ValidationContext::default()));
        assert!(rule.applies_to(&ValidationContext::default().with_subject_kind("rct").with_frameworks(["FDA"])));
    }

    #[test]
    fn test_subject_kind_filter() {
        let rule = noop("r").for_subject_kinds(["rct", "phase-2"]);
        assert!(rule.applies_to(&ValidationContext::default().with_subject_kind("rct")));
        assert!(!rule.applies_to(&ValidationContext::default().with_subject_kind("registry")));
        assert!(rule.applies_to(&ValidationContext::default()));
    }

    #[test]
    fn test_framework_filter_needs_intersection() {
        let rule = noop("r").for_frameworks(["FDA", "EMA"]);
        assert!(rule.applies_to(&ValidationContext::default().with_frameworks(["HIPAA", "EMA"])));
        assert!(!rule.applies_to(&ValidationContext::default().with_frameworks(["HIPAA"])));
        assert!(rule.applies_to(&ValidationContext::default()));
    }

    #[test]
    fn test_check_delegates_to_closure() {
        let rule = FnRule::new("needs-title", "protocol", Severity::Critical, |ctx| {
            match ctx.field("title") {
                Some(_) => Ok(Vec::new()),
                None => Err(RuleError::MissingField("title".to_string())),
            }
        })
        .with_name("Protocol must have a title");

        assert_eq!(rule.name(), "Protocol must have a title");
        assert!(rule.check(&ValidationContext::new(json!({"title": "x"}))).unwrap().is_empty());
        assert_eq!(
            rule.check(&ValidationContext::new(json!({}))),
            Err(RuleError::MissingField("title".to_string()))
        );
    }
}
