use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Score deducted per critical issue
pub const CRITICAL_PENALTY: u32 = 15;
/// Score deducted per warning issue
pub const WARNING_PENALTY: u32 = 5;
/// Score deducted per informational issue
pub const INFO_PENALTY: u32 = 1;
/// Score of a result with no penalised issues
pub const MAX_SCORE: u8 = 100;

/// Issue severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    /// Positive confirmation; counted but never penalised
    Success,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Success => "success",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form pointer to where an issue lives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueLocation {
    /// Owning module, e.g. "protocol", "schema", "database"
    pub module: String,

    /// Tab within the module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,

    /// Form field the issue points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,

    /// Content block the issue points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,

    /// Named section the issue points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl IssueLocation {
    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field_id: impl Into<String>) -> Self {
        self.field_id = Some(field_id.into());
        self
    }
}

/// A single finding produced by a rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Identifier, stable across runs for the same finding
    pub id: String,

    /// Rule group that produced this issue
    pub group_id: String,

    /// How much the issue costs the score
    pub severity: Severity,

    /// Grouping for display (e.g. "regulatory", "data-quality")
    pub category: String,

    /// One-line summary
    pub title: String,

    /// What is wrong
    pub description: String,

    /// How to resolve it
    pub recommendation: String,

    /// Where the issue lives
    pub location: IssueLocation,

    /// Regulatory citation backing the issue, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulatory_reference: Option<String>,

    /// Whether an automatic fix can be offered
    #[serde(default)]
    pub auto_fix_available: bool,
}

impl ValidationIssue {
    /// Create an issue with empty description and recommendation
    pub fn new(
        id: impl Into<String>,
        group_id: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            group_id: group_id.into(),
            severity,
            category: category.into(),
            title: title.into(),
            description: String::new(),
            recommendation: String::new(),
            location: IssueLocation::module("system"),
            regulatory_reference: None,
            auto_fix_available: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_location(mut self, location: IssueLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_regulatory_reference(mut self, reference: impl Into<String>) -> Self {
        self.regulatory_reference = Some(reference.into());
        self
    }

    pub fn with_auto_fix(mut self) -> Self {
        self.auto_fix_available = true;
        self
    }
}

/// Caller-assembled snapshot that rules inspect
///
/// The engine only reads the context; rules must treat it as immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    /// Declared kind of subject (e.g. "rct", "observational")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_kind: Option<String>,
    /// Active regulatory framework tags (e.g. "FDA", "HIPAA")
    #[serde(default)]
    pub active_frameworks: Vec<String>,
    /// Version of the subject the data was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,
    /// Arbitrary structured data for the rules
    #[serde(default)]
    pub data: JsonValue,
}

impl ValidationContext {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_subject_kind(mut self, kind: impl Into<String>) -> Self {
        self.subject_kind = Some(kind.into());
        self
    }

    pub fn with_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version_tag = Some(version.into());
        self
    }

    /// Look up a top-level field of the data
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.data.get(name)
    }

    /// Cheap structural fingerprint used for cache keys
    ///
    /// Covers subject kind, frameworks, version tag, the size of every
    /// top-level array/object and the value of every top-level scalar.
    /// Nested scalar edits are deliberately not observed.
    pub fn fingerprint(&self) -> JsonValue {
        let mut shape = BTreeMap::new();
        if let JsonValue::Object(map) = &self.data {
            for (key, value) in map {
                let summary = match value {
                    JsonValue::Array(items) => JsonValue::from(format!("[{}]", items.len())),
                    JsonValue::Object(fields) => JsonValue::from(format!("{{{}}}", fields.len())),
                    scalar => scalar.clone(),
                };
                shape.insert(key.clone(), summary);
            }
        }

        let mut frameworks = self.active_frameworks.clone();
        frameworks.sort();

        serde_json::json!({
            "subjectKind": self.subject_kind,
            "frameworks": frameworks,
            "versionTag": self.version_tag,
            "shape": shape,
        })
    }
}

/// Aggregated outcome of running one rule group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Rule group that was evaluated
    pub group_id: String,

    /// When the evaluation finished
    pub timestamp: DateTime<Utc>,

    /// Issues in rule registration order
    pub issues: Vec<ValidationIssue>,

    /// Number of critical issues
    pub critical_count: usize,

    /// Number of warnings
    pub warning_count: usize,

    /// Number of informational issues
    pub info_count: usize,

    /// Number of success confirmations
    pub success_count: usize,

    /// Issues excluding success confirmations
    pub total_issues: usize,

    /// Score from 0 to 100 after severity penalties
    pub compliance_score: u8,

    /// False whenever a critical issue is present
    pub can_proceed: bool,

    /// Human-readable reasons the subject cannot proceed
    pub blocked_reasons: Vec<String>,

    /// Wall-clock time spent in rule checks
    pub execution_duration_ms: u64,
}

impl ValidationResult {
    /// Derive counts, score and gating from an ordered issue list
    pub fn from_issues(group_id: impl Into<String>, issues: Vec<ValidationIssue>, execution_duration_ms: u64) -> Self {
        let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
        let critical_count = count(Severity::Critical);
        let warning_count = count(Severity::Warning);
        let info_count = count(Severity::Info);
        let success_count = count(Severity::Success);

        let mut blocked_reasons = Vec::new();
        if critical_count > 0 {
            blocked_reasons.push(format!(
                "{} critical issue{} must be resolved",
                critical_count,
                if critical_count > 1 { "s" } else { "" }
            ));
        }

        Self {
            group_id: group_id.into(),
            timestamp: Utc::now(),
            total_issues: issues.len() - success_count,
            compliance_score: compliance_score(critical_count, warning_count, info_count),
            can_proceed: critical_count == 0,
            issues,
            critical_count,
            warning_count,
            info_count,
            success_count,
            blocked_reasons,
            execution_duration_ms,
        }
    }

    /// Empty, perfect-score result
    pub fn empty(group_id: impl Into<String>) -> Self {
        Self::from_issues(group_id, Vec::new(), 0)
    }

    /// Number of issues at `severity`
    pub fn count_of(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical_count,
            Severity::Warning => self.warning_count,
            Severity::Info => self.info_count,
            Severity::Success => self.success_count,
        }
    }
}

/// `clamp(100 - 15*critical - 5*warning - 1*info, 0, 100)`
pub fn compliance_score(critical: usize, warning: usize, info: usize) -> u8 {
    let penalty = (critical as u64)
        .saturating_mul(CRITICAL_PENALTY as u64)
        .saturating_add((warning as u64).saturating_mul(WARNING_PENALTY as u64))
        .saturating_add((info as u64).saturating_mul(INFO_PENALTY as u64));
    (MAX_SCORE as u64).saturating_sub(penalty) as u8
}

/// Badge-level status from a critical-only run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuickStatus {
    Pass,
    Warning,
    Error,
    Unknown,
}

impl std::fmt::Display for QuickStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuickStatus::Pass => write!(f, "pass"),
            QuickStatus::Warning => write!(f, "warning"),
            QuickStatus::Error => write!(f, "error"),
            QuickStatus::Unknown => write!(f, "unknown"),
        }
    }
}
