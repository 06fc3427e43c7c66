use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of events recorded in the audit log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    SuggestionGenerated,
    SuggestionAccepted,
    SuggestionDismissed,
    SuggestionModified,
    AutoFixApplied,
    AutoFixRejected,
    ValidationRun,
    ValidationPassed,
    ValidationFailed,
    ValidationBlocked,
    GroupActivated,
    GroupDeactivated,
    SettingsChanged,
    InferenceBoundaryModified,
    RestrictionAdded,
    RestrictionRemoved,
    AuditLogExported,
    AuditLogImported,
}

impl AuditAction {
    pub const ALL: [AuditAction; 18] = [
        AuditAction::SuggestionGenerated,
        AuditAction::SuggestionAccepted,
        AuditAction::SuggestionDismissed,
        AuditAction::SuggestionModified,
        AuditAction::AutoFixApplied,
        AuditAction::AutoFixRejected,
        AuditAction::ValidationRun,
        AuditAction::ValidationPassed,
        AuditAction::ValidationFailed,
        AuditAction::ValidationBlocked,
        AuditAction::GroupActivated,
        AuditAction::GroupDeactivated,
        AuditAction::SettingsChanged,
        AuditAction::InferenceBoundaryModified,
        AuditAction::RestrictionAdded,
        AuditAction::RestrictionRemoved,
        AuditAction::AuditLogExported,
        AuditAction::AuditLogImported,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SuggestionGenerated => "SUGGESTION_GENERATED",
            AuditAction::SuggestionAccepted => "SUGGESTION_ACCEPTED",
            AuditAction::SuggestionDismissed => "SUGGESTION_DISMISSED",
            AuditAction::SuggestionModified => "SUGGESTION_MODIFIED",
            AuditAction::AutoFixApplied => "AUTO_FIX_APPLIED",
            AuditAction::AutoFixRejected => "AUTO_FIX_REJECTED",
            AuditAction::ValidationRun => "VALIDATION_RUN",
            AuditAction::ValidationPassed => "VALIDATION_PASSED",
            AuditAction::ValidationFailed => "VALIDATION_FAILED",
            AuditAction::ValidationBlocked => "VALIDATION_BLOCKED",
            AuditAction::GroupActivated => "GROUP_ACTIVATED",
            AuditAction::GroupDeactivated => "GROUP_DEACTIVATED",
            AuditAction::SettingsChanged => "SETTINGS_CHANGED",
            AuditAction::InferenceBoundaryModified => "INFERENCE_BOUNDARY_MODIFIED",
            AuditAction::RestrictionAdded => "RESTRICTION_ADDED",
            AuditAction::RestrictionRemoved => "RESTRICTION_REMOVED",
            AuditAction::AuditLogExported => "AUDIT_LOG_EXPORTED",
            AuditAction::AuditLogImported => "AUDIT_LOG_IMPORTED",
        }
    }

    /// Whether this action counts as a validation run
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AuditAction::ValidationRun
                | AuditAction::ValidationPassed
                | AuditAction::ValidationFailed
                | AuditAction::ValidationBlocked
        )
    }

    /// Whether this action counts as a configuration change
    pub fn is_configuration_change(&self) -> bool {
        matches!(
            self,
            AuditAction::SettingsChanged
                | AuditAction::InferenceBoundaryModified
                | AuditAction::RestrictionAdded
                | AuditAction::RestrictionRemoved
                | AuditAction::GroupActivated
                | AuditAction::GroupDeactivated
        )
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        AuditAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| format!("Unknown audit action: {}", s))
    }
}

/// Who performed an audited action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    /// Automated action by the validation system
    System,
    /// Action taken by a named user
    User {
        #[serde(rename = "userId")]
        id: String,
        #[serde(rename = "userName")]
        name: String,
    },
}

impl Actor {
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Actor::User { id: id.into(), name: name.into() }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::System => None,
            Actor::User { id, .. } => Some(id),
        }
    }

    pub fn user_name(&self) -> Option<&str> {
        match self {
            Actor::System => None,
            Actor::User { name, .. } => Some(name),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Actor::System => "System",
            Actor::User { .. } => "User",
        }
    }
}

/// Selector for actor queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorFilter {
    System,
    AnyUser,
    UserId(String),
}

impl ActorFilter {
    pub fn matches(&self, actor: &Actor) -> bool {
        match (self, actor) {
            (ActorFilter::System, Actor::System) => true,
            (ActorFilter::AnyUser, Actor::User { .. }) => true,
            (ActorFilter::UserId(wanted), Actor::User { id, .. }) => wanted == id,
            _ => false,
        }
    }
}

/// Immutable, hash-chained audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When the action was recorded
    pub timestamp: DateTime<Utc>,

    /// Subject whose log holds this entry
    pub subject_id: String,

    /// Rule group the action concerns; empty for subject-level actions
    pub group_id: String,

    /// Part of the subject the action touched (e.g. "schema", "protocol")
    pub module: String,

    /// What happened
    pub action: AuditAction,

    /// Who did it
    pub actor: Actor,

    /// Action-specific payload
    pub details: serde_json::Value,

    /// `entry_hash` of the preceding entry; absent at the genesis entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_entry_hash: Option<String>,

    /// Digest over every other field
    pub entry_hash: String,
}

/// Rolling counters kept alongside a subject's log
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Suggestions generated
    pub total_suggestions: u64,

    /// Suggestions accepted by a user
    pub accepted_suggestions: u64,

    /// Suggestions dismissed by a user
    pub dismissed_suggestions: u64,

    /// Auto-fixes applied
    pub auto_fixes_applied: u64,

    /// Settings, boundary, restriction and group activation changes
    pub configuration_changes: u64,

    /// Validation runs of any outcome
    pub validation_runs: u64,

    /// Score of the most recent validation run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation_score: Option<f64>,
}

impl AuditStats {
    /// Fold one appended action into the counters
    pub fn record(&mut self, action: AuditAction, details: &serde_json::Value) {
        match action {
            AuditAction::SuggestionGenerated => self.total_suggestions += 1,
            AuditAction::SuggestionAccepted => self.accepted_suggestions += 1,
            AuditAction::SuggestionDismissed => self.dismissed_suggestions += 1,
            AuditAction::AutoFixApplied => self.auto_fixes_applied += 1,
            a if a.is_validation() => {
                self.validation_runs += 1;
                if let Some(score) = details.get("score").and_then(|s| s.as_f64()) {
                    self.last_validation_score = Some(score);
                }
            }
            a if a.is_configuration_change() => self.configuration_changes += 1,
            _ => {}
        }
    }
}

/// Per-group suggestion statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupAuditStats {
    /// Rule group these numbers cover
    pub group_id: String,

    /// Suggestions generated for the group
    pub suggestions_generated: u64,

    /// Suggestions accepted for the group
    pub suggestions_accepted: u64,

    /// Suggestions dismissed for the group
    pub suggestions_dismissed: u64,

    /// Whole-number percentage of generated suggestions that were accepted
    pub acceptance_rate: u32,

    /// Timestamp of the group's newest live entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// A subject's live audit log as persisted under `auditlog:<subjectId>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    /// Subject this log belongs to
    pub subject_id: String,

    /// Live entries in chain order
    pub entries: Vec<AuditLogEntry>,

    /// Timestamp of the newest append
    pub last_updated: DateTime<Utc>,

    /// Counters over every entry ever appended, archived ones included
    pub stats: AuditStats,

    /// Archive segment keys, oldest first
    #[serde(default)]
    pub archives: Vec<String>,
}

impl AuditLog {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            entries: Vec::new(),
            last_updated: Utc::now(),
            stats: AuditStats::default(),
            archives: Vec::new(),
        }
    }

    pub fn last_entry(&self) -> Option<&AuditLogEntry> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.archives.is_empty()
    }
}
