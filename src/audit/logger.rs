use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::config::AuditSettings;
use crate::error::{ComplianceError, ComplianceResult, StoreError};
use crate::models::{
    generate_id, Actor, ActorFilter, AuditAction, AuditLog, AuditLogEntry, AuditStats, GroupAuditStats,
    ValidationIssue, ValidationResult,
};
use crate::storage::{audit_archive_key, audit_log_key, KeyValueStore};
use crate::sync::lock;
use super::hashing::EntryHasher;

/// Default number of live entries kept per subject
pub const DEFAULT_MAX_LIVE_ENTRIES: usize = 1_000;

/// Module recorded for workspace-wide actions such as group activation
pub const WORKSPACE_MODULE: &str = "workspace";

/// Entries moved out of the live log, stored under an archive key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSegment {
    pub subject_id: String,
    pub archived_at: DateTime<Utc>,
    pub entries: Vec<AuditLogEntry>,
}

/// What an applied auto-fix changed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoFixChange {
    pub suggestion_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub old_value: JsonValue,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub new_value: JsonValue,
}

/// Why a chain check failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IntegrityFailureKind {
    /// Recomputed hash differs from the stored `entryHash`
    HashMismatch,
    /// `previousEntryHash` does not equal the preceding entry's hash
    BrokenLink,
    /// Full history does not start at an entry without a predecessor
    MissingGenesis,
    /// An archive segment listed by the log could not be read
    MissingArchive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityFailure {
    /// Position in the verified sequence
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<Uuid>,
    pub kind: IntegrityFailureKind,
}

/// Outcome of a chain verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub subject_id: String,
    pub entries_checked: usize,
    /// Whether archived entries were included
    pub full_history: bool,
    /// First live entry links to an archived predecessor
    pub dangling_head: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }
}

/// Append-only, hash-chained audit log over a key-value store
///
/// Each subject's log is kept under `auditlog:<subjectId>` and rewritten on
/// every append. Appends for one subject are serialized by a per-subject lock.
pub struct AuditLogger {
    store: Arc<dyn KeyValueStore>,
    hasher: EntryHasher,
    max_live_entries: usize,
    subject_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Logs whose last write failed, flushed by the next successful write
    pending: Mutex<HashMap<String, AuditLog>>,
}

impl AuditLogger {
    /// Logger with SHA-256 hashing and the default retention bound
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            hasher: EntryHasher::default(),
            max_live_entries: DEFAULT_MAX_LIVE_ENTRIES,
            subject_locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(store: Arc<dyn KeyValueStore>, settings: &AuditSettings) -> ComplianceResult<Self> {
        let hasher = EntryHasher::new(settings.hash_algorithm, settings.hmac_key.as_deref())?;
        Ok(Self::new(store)
            .with_hasher(hasher)
            .with_max_live_entries(settings.max_live_entries))
    }

    pub fn with_hasher(mut self, hasher: EntryHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Retention bound; values below 1 are raised to 1
    pub fn with_max_live_entries(mut self, max_live_entries: usize) -> Self {
        self.max_live_entries = max_live_entries.max(1);
        self
    }

    pub fn hasher(&self) -> &EntryHasher {
        &self.hasher
    }

    pub fn max_live_entries(&self) -> usize {
        self.max_live_entries
    }

    pub(crate) fn subject_lock(&self, subject_id: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.subject_locks);
        Arc::clone(locks.entry(subject_id.to_string()).or_default())
    }

    /// Current log for `subject_id`, preferring an unflushed in-memory copy
    pub fn load_log(&self, subject_id: &str) -> ComplianceResult<Option<AuditLog>> {
        if let Some(log) = lock(&self.pending).get(subject_id) {
            return Ok(Some(log.clone()));
        }
        match self.store.get(&audit_log_key(subject_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether `subject_id` has an unflushed log in memory
    pub fn has_pending(&self, subject_id: &str) -> bool {
        lock(&self.pending).contains_key(subject_id)
    }

    /// Append one entry linked to the subject's last entry
    pub fn append(
        &self,
        subject_id: &str,
        group_id: &str,
        module: &str,
        action: AuditAction,
        actor: Actor,
        details: JsonValue,
    ) -> ComplianceResult<AuditLogEntry> {
        let subject_lock = self.subject_lock(subject_id);
        let _guard = lock(&subject_lock);

        let mut log = self
            .load_log(subject_id)?
            .unwrap_or_else(|| AuditLog::new(subject_id));

        let mut entry = AuditLogEntry {
            id: generate_id(),
            timestamp: Utc::now(),
            subject_id: subject_id.to_string(),
            group_id: group_id.to_string(),
            module: module.to_string(),
            action,
            actor,
            details,
            previous_entry_hash: log.last_entry().map(|last| last.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = self.hasher.hash_entry(&entry)?;

        log.stats.record(action, &entry.details);
        log.last_updated = entry.timestamp;
        log.entries.push(entry.clone());

        self.enforce_retention(&mut log);
        self.persist(&mut log)?;

        tracing::debug!(subject_id, group_id, action = %action, entry_id = %entry.id, "Audit entry appended");
        Ok(entry)
    }

    /// Write the log, archiving and retrying once if the store refuses it
    pub(crate) fn persist(&self, log: &mut AuditLog) -> ComplianceResult<()> {
        let subject_id = log.subject_id.clone();
        let first_error = match self.write_log(log)? {
            Ok(()) => {
                lock(&self.pending).remove(&subject_id);
                return Ok(());
            }
            Err(e) => e,
        };

        let count = if log.entries.len() > self.max_live_entries {
            log.entries.len() - self.max_live_entries
        } else {
            log.entries.len() / 2
        };
        tracing::warn!(
            subject_id = %subject_id,
            error = %first_error,
            archiving = count,
            "Audit log write failed, archiving and retrying"
        );

        let outcome = match self.archive_oldest(log, count) {
            Ok(()) => self.write_log(log)?,
            Err(ComplianceError::Store(e)) => Err(e),
            Err(e) => return Err(e),
        };

        match outcome {
            Ok(()) => {
                lock(&self.pending).remove(&subject_id);
                Ok(())
            }
            Err(source) => {
                tracing::error!(subject_id = %subject_id, error = %source, "Audit log write failed after retry");
                lock(&self.pending).insert(subject_id.clone(), log.clone());
                Err(ComplianceError::Persistence { subject_id, source })
            }
        }
    }

    /// Serialization errors surface in the outer result, store errors in the inner one
    fn write_log(&self, log: &AuditLog) -> ComplianceResult<Result<(), StoreError>> {
        let bytes = serde_json::to_vec(log)?;
        Ok(self.store.set(&audit_log_key(&log.subject_id), &bytes))
    }

    /// Number of live entries left after a retention pass
    ///
    /// Archiving down to this mark rather than to the cap itself means one
    /// segment covers a tenth of the bound, so the archive index grows far
    /// slower than the history. At least one entry stays live so the next
    /// append has something to link to.
    pub fn retention_low_water(&self) -> usize {
        self.max_live_entries
            .saturating_sub((self.max_live_entries / 10).max(1))
            .max(1)
    }

    /// Archive the oldest entries once the live log exceeds the bound
    pub(crate) fn enforce_retention(&self, log: &mut AuditLog) {
        if log.entries.len() <= self.max_live_entries {
            return;
        }
        let count = log.entries.len() - self.retention_low_water();
        if let Err(e) = self.archive_oldest(log, count) {
            tracing::warn!(subject_id = %log.subject_id, error = %e, "Archival failed, keeping entries live");
        }
    }

    /// Move the oldest `count` live entries into a new archive segment
    fn archive_oldest(&self, log: &mut AuditLog, count: usize) -> ComplianceResult<()> {
        let count = count.min(log.entries.len());
        if count == 0 {
            return Ok(());
        }

        let now = Utc::now();
        let mut stamp = now.timestamp_millis();
        let mut key = audit_archive_key(&log.subject_id, stamp);
        while log.archives.contains(&key) {
            stamp += 1;
            key = audit_archive_key(&log.subject_id, stamp);
        }

        let segment = ArchiveSegment {
            subject_id: log.subject_id.clone(),
            archived_at: now,
            entries: log.entries[..count].to_vec(),
        };
        self.store.set(&key, &serde_json::to_vec(&segment)?)?;

        log.entries.drain(..count);
        log.archives.push(key.clone());
        tracing::info!(
            subject_id = %log.subject_id,
            archived = count,
            remaining = log.entries.len(),
            archive_key = %key,
            "Archived audit entries"
        );
        Ok(())
    }

    /// Read one archive segment
    pub fn load_archive(&self, key: &str) -> ComplianceResult<Option<ArchiveSegment>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==========================================
    // CONVENIENCE LOGGERS
    // ==========================================

    /// Record a suggestion surfaced to the user
    pub fn log_suggestion_generated(
        &self,
        subject_id: &str,
        module: &str,
        issue: &ValidationIssue,
    ) -> ComplianceResult<AuditLogEntry> {
        let message = if issue.description.is_empty() {
            issue.title.clone()
        } else {
            issue.description.clone()
        };
        self.append(
            subject_id,
            &issue.group_id,
            module,
            AuditAction::SuggestionGenerated,
            Actor::System,
            json!({
                "suggestionId": issue.id,
                "message": message,
                "severity": issue.severity,
                "category": issue.category,
                "regulatoryCitation": issue.regulatory_reference,
                "autoFixAvailable": issue.auto_fix_available,
            }),
        )
    }

    pub fn log_suggestion_accepted(
        &self,
        subject_id: &str,
        group_id: &str,
        module: &str,
        suggestion_id: &str,
        actor: Actor,
    ) -> ComplianceResult<AuditLogEntry> {
        self.append(
            subject_id,
            group_id,
            module,
            AuditAction::SuggestionAccepted,
            actor,
            json!({ "suggestionId": suggestion_id }),
        )
    }

    pub fn log_suggestion_dismissed(
        &self,
        subject_id: &str,
        group_id: &str,
        module: &str,
        suggestion_id: &str,
        actor: Actor,
        reason: Option<&str>,
    ) -> ComplianceResult<AuditLogEntry> {
        let mut details = json!({ "suggestionId": suggestion_id });
        if let Some(reason) = reason {
            details["reason"] = json!(reason);
        }
        self.append(subject_id, group_id, module, AuditAction::SuggestionDismissed, actor, details)
    }

    pub fn log_auto_fix_applied(
        &self,
        subject_id: &str,
        group_id: &str,
        module: &str,
        change: &AutoFixChange,
        actor: Actor,
    ) -> ComplianceResult<AuditLogEntry> {
        self.append(
            subject_id,
            group_id,
            module,
            AuditAction::AutoFixApplied,
            actor,
            serde_json::to_value(change)?,
        )
    }

    /// Record a validation run; the action reflects the result
    ///
    /// Blocked when `blockedReasons` is non-empty, failed when critical
    /// issues exist without blocking reasons, passed otherwise.
    pub fn log_validation_run(
        &self,
        subject_id: &str,
        module: &str,
        result: &ValidationResult,
    ) -> ComplianceResult<AuditLogEntry> {
        let action = if !result.blocked_reasons.is_empty() {
            AuditAction::ValidationBlocked
        } else if result.critical_count > 0 {
            AuditAction::ValidationFailed
        } else {
            AuditAction::ValidationPassed
        };

        self.append(
            subject_id,
            &result.group_id,
            module,
            action,
            Actor::System,
            json!({
                "score": result.compliance_score,
                "issuesFound": result.total_issues,
                "criticalCount": result.critical_count,
                "warningCount": result.warning_count,
                "infoCount": result.info_count,
                "blockedReasons": result.blocked_reasons,
                "executionDurationMs": result.execution_duration_ms,
            }),
        )
    }

    pub fn log_group_activated(&self, subject_id: &str, group_id: &str, actor: Actor) -> ComplianceResult<AuditLogEntry> {
        self.append(subject_id, group_id, WORKSPACE_MODULE, AuditAction::GroupActivated, actor, json!({}))
    }

    pub fn log_group_deactivated(&self, subject_id: &str, group_id: &str, actor: Actor) -> ComplianceResult<AuditLogEntry> {
        self.append(subject_id, group_id, WORKSPACE_MODULE, AuditAction::GroupDeactivated, actor, json!({}))
    }

    pub fn log_settings_changed(
        &self,
        subject_id: &str,
        group_id: &str,
        old_value: JsonValue,
        new_value: JsonValue,
        actor: Actor,
    ) -> ComplianceResult<AuditLogEntry> {
        self.append(
            subject_id,
            group_id,
            WORKSPACE_MODULE,
            AuditAction::SettingsChanged,
            actor,
            json!({ "oldValue": old_value, "newValue": new_value }),
        )
    }

    pub fn log_inference_boundary_modified(
        &self,
        subject_id: &str,
        group_id: &str,
        change: &str,
        inference: &str,
        justification: &str,
        actor: Actor,
    ) -> ComplianceResult<AuditLogEntry> {
        self.append(
            subject_id,
            group_id,
            WORKSPACE_MODULE,
            AuditAction::InferenceBoundaryModified,
            actor,
            json!({
                "message": format!("{}: {}", change, inference),
                "justification": justification,
            }),
        )
    }

    // ==========================================
    // QUERIES
    // ==========================================

    /// All live entries, oldest first
    pub fn entries(&self, subject_id: &str) -> ComplianceResult<Vec<AuditLogEntry>> {
        Ok(self.load_log(subject_id)?.map(|log| log.entries).unwrap_or_default())
    }

    fn filtered<F>(&self, subject_id: &str, predicate: F) -> ComplianceResult<Vec<AuditLogEntry>>
    where
        F: Fn(&AuditLogEntry) -> bool,
    {
        Ok(self.entries(subject_id)?.into_iter().filter(|e| predicate(e)).collect())
    }

    pub fn entries_by_group(&self, subject_id: &str, group_id: &str) -> ComplianceResult<Vec<AuditLogEntry>> {
        self.filtered(subject_id, |e| e.group_id == group_id)
    }

    pub fn entries_by_action(&self, subject_id: &str, action: AuditAction) -> ComplianceResult<Vec<AuditLogEntry>> {
        self.filtered(subject_id, |e| e.action == action)
    }

    pub fn entries_by_actor(&self, subject_id: &str, filter: &ActorFilter) -> ComplianceResult<Vec<AuditLogEntry>> {
        self.filtered(subject_id, |e| filter.matches(&e.actor))
    }

    /// Entries with `start <= timestamp <= end`
    pub fn entries_in_range(
        &self,
        subject_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ComplianceResult<Vec<AuditLogEntry>> {
        self.filtered(subject_id, |e| e.timestamp >= start && e.timestamp <= end)
    }

    /// The last `limit` entries, newest first
    pub fn recent_entries(&self, subject_id: &str, limit: usize) -> ComplianceResult<Vec<AuditLogEntry>> {
        Ok(self.entries(subject_id)?.into_iter().rev().take(limit).collect())
    }

    // ==========================================
    // STATISTICS
    // ==========================================

    pub fn stats(&self, subject_id: &str) -> ComplianceResult<Option<AuditStats>> {
        Ok(self.load_log(subject_id)?.map(|log| log.stats))
    }

    /// Suggestion statistics for one group over the live entries
    pub fn group_stats(&self, subject_id: &str, group_id: &str) -> ComplianceResult<Option<GroupAuditStats>> {
        let Some(log) = self.load_log(subject_id)? else {
            return Ok(None);
        };
        let entries: Vec<&AuditLogEntry> = log.entries.iter().filter(|e| e.group_id == group_id).collect();
        Ok(Some(group_stats_from(group_id, &entries)))
    }

    /// Statistics for every group that appears in the live log, ordered by group id
    ///
    /// Subject-level entries such as exports carry no group and are skipped.
    pub fn all_group_stats(&self, subject_id: &str) -> ComplianceResult<Vec<GroupAuditStats>> {
        let Some(log) = self.load_log(subject_id)? else {
            return Ok(Vec::new());
        };
        let mut by_group: BTreeMap<&str, Vec<&AuditLogEntry>> = BTreeMap::new();
        for entry in log.entries.iter().filter(|e| !e.group_id.is_empty()) {
            by_group.entry(entry.group_id.as_str()).or_default().push(entry);
        }
        Ok(by_group
            .into_iter()
            .map(|(group_id, entries)| group_stats_from(group_id, &entries))
            .collect())
    }

    // ==========================================
    // INTEGRITY VERIFICATION
    // ==========================================

    /// Verify the live chain; `true` when nothing was tampered with
    pub fn verify_integrity(&self, subject_id: &str) -> ComplianceResult<bool> {
        Ok(self.integrity_report(subject_id)?.is_valid())
    }

    /// Verify the live chain and describe the outcome
    ///
    /// A first live entry that points at an archived predecessor is accepted
    /// and reported through `dangling_head`.
    pub fn integrity_report(&self, subject_id: &str) -> ComplianceResult<IntegrityReport> {
        let entries = self.entries(subject_id)?;
        Ok(self.check_chain(subject_id, &entries, false))
    }

    /// Verify archived and live entries as one chain starting at a genesis entry
    pub fn verify_full_history(&self, subject_id: &str) -> ComplianceResult<IntegrityReport> {
        let Some(log) = self.load_log(subject_id)? else {
            return Ok(self.check_chain(subject_id, &[], true));
        };
        Ok(self.history(&log)?.1)
    }

    /// Archived entries followed by the live ones, with the full-history report
    ///
    /// Unreadable segments are skipped in the returned entries and reported
    /// as `MissingArchive`.
    pub(crate) fn history(&self, log: &AuditLog) -> ComplianceResult<(Vec<AuditLogEntry>, IntegrityReport)> {
        let mut history = Vec::new();
        let mut missing_at = None;
        for key in &log.archives {
            match self.load_archive(key)? {
                Some(segment) => history.extend(segment.entries),
                None => {
                    tracing::warn!(subject_id = %log.subject_id, archive_key = %key, "Archive segment missing");
                    missing_at.get_or_insert(history.len());
                }
            }
        }
        history.extend(log.entries.iter().cloned());

        let report = match missing_at {
            Some(index) => IntegrityReport {
                subject_id: log.subject_id.clone(),
                entries_checked: index,
                full_history: true,
                dangling_head: false,
                failure: Some(IntegrityFailure {
                    index,
                    entry_id: None,
                    kind: IntegrityFailureKind::MissingArchive,
                }),
            },
            None => self.check_chain(&log.subject_id, &history, true),
        };
        Ok((history, report))
    }

    pub(crate) fn check_chain(&self, subject_id: &str, entries: &[AuditLogEntry], full_history: bool) -> IntegrityReport {
        let mut report = IntegrityReport {
            subject_id: subject_id.to_string(),
            entries_checked: 0,
            full_history,
            dangling_head: false,
            failure: None,
        };

        for (index, entry) in entries.iter().enumerate() {
            report.entries_checked = index + 1;

            let kind = if !self.hasher.matches(entry) {
                Some(IntegrityFailureKind::HashMismatch)
            } else if index == 0 {
                match (&entry.previous_entry_hash, full_history) {
                    (Some(_), true) => Some(IntegrityFailureKind::MissingGenesis),
                    (Some(_), false) => {
                        report.dangling_head = true;
                        None
                    }
                    (None, _) => None,
                }
            } else if entry.previous_entry_hash.as_deref() != Some(entries[index - 1].entry_hash.as_str()) {
                Some(IntegrityFailureKind::BrokenLink)
            } else {
                None
            };

            if let Some(kind) = kind {
                tracing::warn!(subject_id, index, entry_id = %entry.id, ?kind, "Audit log integrity check failed");
                report.failure = Some(IntegrityFailure {
                    index,
                    entry_id: Some(entry.id),
                    kind,
                });
                break;
            }
        }

        report
    }
}

fn group_stats_from(group_id: &str, entries: &[&AuditLogEntry]) -> GroupAuditStats {
    let count = |action: AuditAction| entries.iter().filter(|e| e.action == action).count() as u64;
    let generated = count(AuditAction::SuggestionGenerated);
    let accepted = count(AuditAction::SuggestionAccepted);
    let acceptance_rate = if generated > 0 {
        ((accepted as f64 / generated as f64) * 100.0).round() as u32
    } else {
        0
    };

    GroupAuditStats {
        group_id: group_id.to_string(),
        suggestions_generated: generated,
        suggestions_accepted: accepted,
        suggestions_dismissed: count(AuditAction::SuggestionDismissed),
        acceptance_rate,
        last_activity: entries.iter().map(|e| e.timestamp).max(),
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("hasher", &self.hasher)
            .field("max_live_entries", &self.max_live_entries)
            .field("pending", &lock(&self.pending).len())
            .finish()
    }
}
