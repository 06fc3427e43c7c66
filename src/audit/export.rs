use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{ComplianceError, ComplianceResult};
use crate::models::{Actor, AuditAction, AuditLog, AuditLogEntry, AuditStats};
use crate::sync::lock;
use super::hashing::HashAlgorithm;
use super::logger::AuditLogger;

/// Format version written into export metadata
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Module recorded on export and import entries
pub const AUDIT_MODULE: &str = "audit";

const CSV_HEADERS: [&str; 16] = [
    "timestamp",
    "subjectId",
    "groupId",
    "module",
    "action",
    "actor",
    "userId",
    "userName",
    "severity",
    "message",
    "regulatoryCitation",
    "details",
    "entryId",
    "previousEntryHash",
    "entryHash",
    "integrityVerified",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub subject_id: String,
    /// Set when the export covers a single group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub exported_at: DateTime<Utc>,
    pub total_entries: usize,
    pub integrity_verified: bool,
    pub hash_algorithm: HashAlgorithm,
    pub version: String,
}

/// JSON export document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditExport {
    pub export_metadata: ExportMetadata,
    pub stats: AuditStats,
    pub entries: Vec<AuditLogEntry>,
}

/// Everything an export serializes, read after its own record was appended
struct RecordedHistory {
    stats: AuditStats,
    entries: Vec<AuditLogEntry>,
    integrity_verified: bool,
}

impl AuditLogger {
    /// Record the export in the log itself, then read back the full history
    ///
    /// Returns `None` for a subject with no log.
    fn record_export(
        &self,
        subject_id: &str,
        group_id: &str,
        format: &str,
        actor: Actor,
    ) -> ComplianceResult<Option<RecordedHistory>> {
        if self.load_log(subject_id)?.is_none() {
            return Ok(None);
        }
        self.append(
            subject_id,
            group_id,
            AUDIT_MODULE,
            AuditAction::AuditLogExported,
            actor,
            json!({ "format": format }),
        )?;
        let Some(log) = self.load_log(subject_id)? else {
            return Ok(None);
        };

        let (entries, report) = self.history(&log)?;
        Ok(Some(RecordedHistory {
            stats: log.stats,
            entries,
            integrity_verified: report.is_valid(),
        }))
    }

    /// Export the whole history, archived segments first, as pretty-printed JSON
    pub fn to_json(&self, subject_id: &str, actor: Actor) -> ComplianceResult<Option<String>> {
        let Some(recorded) = self.record_export(subject_id, "", "json", actor)? else {
            return Ok(None);
        };

        let export = AuditExport {
            export_metadata: ExportMetadata {
                subject_id: subject_id.to_string(),
                group_id: None,
                exported_at: Utc::now(),
                total_entries: recorded.entries.len(),
                integrity_verified: recorded.integrity_verified,
                hash_algorithm: self.hasher().algorithm(),
                version: EXPORT_FORMAT_VERSION.to_string(),
            },
            stats: recorded.stats,
            entries: recorded.entries,
        };
        Ok(Some(serde_json::to_string_pretty(&export)?))
    }

    /// Export one group's entries as JSON
    ///
    /// `integrityVerified` reflects the whole chain. Group exports are not
    /// importable since the subset is not a chain.
    pub fn export_group_json(&self, subject_id: &str, group_id: &str, actor: Actor) -> ComplianceResult<Option<String>> {
        let Some(recorded) = self.record_export(subject_id, group_id, "json", actor)? else {
            return Ok(None);
        };
        let entries: Vec<AuditLogEntry> = recorded.entries.into_iter().filter(|e| e.group_id == group_id).collect();

        let export = AuditExport {
            export_metadata: ExportMetadata {
                subject_id: subject_id.to_string(),
                group_id: Some(group_id.to_string()),
                exported_at: Utc::now(),
                total_entries: entries.len(),
                integrity_verified: recorded.integrity_verified,
                hash_algorithm: self.hasher().algorithm(),
                version: EXPORT_FORMAT_VERSION.to_string(),
            },
            stats: recorded.stats,
            entries,
        };
        Ok(Some(serde_json::to_string_pretty(&export)?))
    }

    /// Export the whole history as CSV, one row per entry in chain order
    ///
    /// Every row carries the chain verdict in `integrityVerified`, and the
    /// complete details as compact JSON.
    pub fn to_csv(&self, subject_id: &str, actor: Actor) -> ComplianceResult<Option<String>> {
        let Some(recorded) = self.record_export(subject_id, "", "csv", actor)? else {
            return Ok(None);
        };
        let verified = recorded.integrity_verified.to_string();

        let mut lines = Vec::with_capacity(recorded.entries.len() + 1);
        lines.push(CSV_HEADERS.join(","));
        for entry in &recorded.entries {
            let row = [
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                entry.subject_id.clone(),
                entry.group_id.clone(),
                entry.module.clone(),
                entry.action.as_str().to_string(),
                entry.actor.label().to_string(),
                entry.actor.user_id().unwrap_or_default().to_string(),
                entry.actor.user_name().unwrap_or_default().to_string(),
                detail_text(&entry.details, "severity"),
                detail_text(&entry.details, "message"),
                detail_text(&entry.details, "regulatoryCitation"),
                entry.details.to_string(),
                entry.id.to_string(),
                entry.previous_entry_hash.clone().unwrap_or_default(),
                entry.entry_hash.clone(),
                verified.clone(),
            ];
            lines.push(row.iter().map(|field| csv_field(field)).collect::<Vec<_>>().join(","));
        }
        Ok(Some(lines.join("\n")))
    }

    /// Restore a JSON export into a subject that has no log yet
    ///
    /// The payload is rejected as a whole if it does not parse, is a group
    /// export, mixes subjects, was hashed with another algorithm, or is not
    /// a valid chain from a genesis entry. Entries beyond the retention bound
    /// are archived on the way in. A successful import is itself logged.
    pub fn import_json(&self, payload: &str, actor: Actor) -> ComplianceResult<AuditLogEntry> {
        let export: AuditExport = serde_json::from_str(payload).map_err(|e| ComplianceError::MalformedImport {
            reason: format!("invalid JSON export: {}", e),
        })?;
        let metadata = &export.export_metadata;
        let subject_id = metadata.subject_id.clone();
        let source_exported_at = metadata.exported_at;

        if metadata.group_id.is_some() {
            return Err(malformed("group exports cannot be imported"));
        }
        if export.entries.is_empty() {
            return Err(malformed("export contains no entries"));
        }
        if export.entries.iter().any(|e| e.subject_id != subject_id) {
            return Err(malformed("entries belong to a different subject"));
        }
        if metadata.hash_algorithm != self.hasher().algorithm() {
            return Err(malformed(&format!(
                "export hashed with {}, logger uses {}",
                metadata.hash_algorithm,
                self.hasher().algorithm()
            )));
        }

        let report = self.check_chain(&subject_id, &export.entries, true);
        if let Some(failure) = report.failure {
            return Err(malformed(&format!(
                "chain verification failed at entry {} ({:?})",
                failure.index, failure.kind
            )));
        }

        let imported = export.entries.len();
        {
            let subject_lock = self.subject_lock(&subject_id);
            let _guard = lock(&subject_lock);

            if self.load_log(&subject_id)?.is_some() {
                return Err(ComplianceError::ImportConflict { subject_id });
            }

            let mut stats = AuditStats::default();
            for entry in &export.entries {
                stats.record(entry.action, &entry.details);
            }
            let mut log = AuditLog::new(subject_id.as_str());
            log.last_updated = export.entries.last().map(|e| e.timestamp).unwrap_or_else(Utc::now);
            log.entries = export.entries;
            log.stats = stats;

            self.enforce_retention(&mut log);
            self.persist(&mut log)?;
        }

        tracing::info!(subject_id = %subject_id, imported, "Imported audit log");
        self.append(
            &subject_id,
            "",
            AUDIT_MODULE,
            AuditAction::AuditLogImported,
            actor,
            json!({ "importedEntries": imported, "sourceExportedAt": source_exported_at }),
        )
    }
}

fn malformed(reason: &str) -> ComplianceError {
    ComplianceError::MalformedImport {
        reason: reason.to_string(),
    }
}

/// Text form of a top-level detail value; empty when absent or null
fn detail_text(details: &JsonValue, key: &str) -> String {
    match details.get(key) {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, ValidationIssue};
    use crate::storage::{audit_log_key, KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn seeded_logger() -> AuditLogger {
        let logger = AuditLogger::new(Arc::new(MemoryStore::new()));
        let issue = ValidationIssue::new("s1", "dq", Severity::Warning, "data-quality", "Unit missing")
            .with_description("Field \"weight\" has no unit, please add one")
            .with_regulatory_reference("21 CFR 11.10");
        logger.log_suggestion_generated("p1", "schema", &issue).unwrap();
        logger
            .log_suggestion_accepted("p1", "dq", "schema", "s1", Actor::user("u1", "Ada"))
            .unwrap();
        logger
    }

    #[test]
    fn test_json_export_contains_its_own_record() {
        let logger = seeded_logger();
        let json = logger.to_json("p1", Actor::user("u1", "Ada")).unwrap().unwrap();
        let export: AuditExport = serde_json::from_str(&json).unwrap();

        assert_eq!(export.entries.len(), 3);
        assert_eq!(export.export_metadata.total_entries, 3);
        assert!(export.export_metadata.integrity_verified);
        assert_eq!(export.entries[2].action, AuditAction::AuditLogExported);
        assert_eq!(export.stats.total_suggestions, 1);
        assert_eq!(logger.entries("p1").unwrap().len(), 3);
    }

    #[test]
    fn test_export_of_unknown_subject_is_none() {
        let logger = AuditLogger::new(Arc::new(MemoryStore::new()));
        assert!(logger.to_json("nobody", Actor::System).unwrap().is_none());
        assert!(logger.to_csv("nobody", Actor::System).unwrap().is_none());
        assert!(logger.entries("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let logger = seeded_logger();
        let csv = logger.to_csv("p1", Actor::System).unwrap().unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADERS.join(","));
        assert!(lines[1].contains("\"Field \"\"weight\"\" has no unit, please add one\""));
        assert!(lines[1].contains(",warning,"));
        assert!(lines[1].contains("21 CFR 11.10"));
        assert!(lines[2].contains(",User,u1,Ada,"));
        assert!(lines[3].contains("AUDIT_LOG_EXPORTED"));
        assert!(lines[1..].iter().all(|line| line.ends_with(",true")));
        assert!(lines[2].contains(&logger.entries("p1").unwrap()[0].entry_hash));
    }

    #[test]
    fn test_csv_export_reports_tampering() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone());
        for run in 0..3 {
            logger
                .append("p1", "dq", "validation", AuditAction::ValidationRun, Actor::System, json!({ "run": run }))
                .unwrap();
        }

        let key = audit_log_key("p1");
        let mut log: AuditLog = serde_json::from_slice(&store.get(&key).unwrap().unwrap()).unwrap();
        log.entries[1].details = json!({ "run": 42 });
        store.set(&key, &serde_json::to_vec(&log).unwrap()).unwrap();

        let csv = logger.to_csv("p1", Actor::System).unwrap().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].ends_with("previousEntryHash,entryHash,integrityVerified"));
        assert_eq!(lines.len(), 5);
        assert!(lines[1..].iter().all(|line| line.ends_with(",false")));
        assert!(lines[2].contains("\"{\"\"run\"\":42}\""));
    }

    #[test]
    fn test_export_after_archival_covers_full_history() {
        let source = AuditLogger::new(Arc::new(MemoryStore::new())).with_max_live_entries(2);
        for run in 0..5 {
            source
                .append("p1", "dq", "validation", AuditAction::ValidationRun, Actor::System, json!({ "run": run }))
                .unwrap();
        }
        assert!(!source.load_log("p1").unwrap().unwrap().archives.is_empty());

        let json = source.to_json("p1", Actor::System).unwrap().unwrap();
        let export: AuditExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.entries.len(), 6);
        assert_eq!(export.export_metadata.total_entries, 6);
        assert!(export.export_metadata.integrity_verified);
        assert!(export.entries[0].previous_entry_hash.is_none());
        assert_eq!(export.entries[0].details["run"], json!(0));

        let target = AuditLogger::new(Arc::new(MemoryStore::new())).with_max_live_entries(2);
        target.import_json(&json, Actor::System).unwrap();
        assert!(target.entries("p1").unwrap().len() <= 2);

        let full = target.verify_full_history("p1").unwrap();
        assert!(full.is_valid());
        assert_eq!(full.entries_checked, 7);
        assert_eq!(target.stats("p1").unwrap().unwrap().validation_runs, 5);
    }

    #[test]
    fn test_import_rejects_export_without_genesis() {
        let source = seeded_logger();
        let json = source.to_json("p1", Actor::System).unwrap().unwrap();
        let mut doc: JsonValue = serde_json::from_str(&json).unwrap();
        if let Some(entries) = doc["entries"].as_array_mut() {
            entries.remove(0);
        }
        let truncated = serde_json::to_string(&doc).unwrap();

        let target = AuditLogger::new(Arc::new(MemoryStore::new()));
        let err = target.import_json(&truncated, Actor::System).unwrap_err();
        assert!(matches!(err, ComplianceError::MalformedImport { .. }));
        assert!(target.load_log("p1").unwrap().is_none());
    }

    #[test]
    fn test_group_export_filters_entries() {
        let logger = seeded_logger();
        logger
            .append("p1", "irb", "consent", AuditAction::ValidationRun, Actor::System, json!({}))
            .unwrap();

        let json = logger.export_group_json("p1", "dq", Actor::System).unwrap().unwrap();
        let export: AuditExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.export_metadata.group_id.as_deref(), Some("dq"));
        assert_eq!(export.entries.len(), 3);
        assert!(export.entries.iter().all(|e| e.group_id == "dq"));
    }

    #[test]
    fn test_import_round_trip_into_empty_subject() {
        let source = seeded_logger();
        let json = source.to_json("p1", Actor::System).unwrap().unwrap();

        let target = AuditLogger::new(Arc::new(MemoryStore::new()));
        let entry = target.import_json(&json, Actor::user("u9", "Auditor")).unwrap();
        assert_eq!(entry.action, AuditAction::AuditLogImported);
        assert_eq!(entry.details["importedEntries"], json!(3));

        let entries = target.entries("p1").unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[..3], source.entries("p1").unwrap()[..]);
        assert!(target.verify_integrity("p1").unwrap());
        assert_eq!(target.stats("p1").unwrap().unwrap().accepted_suggestions, 1);
    }

    #[test]
    fn test_import_rejects_existing_subject() {
        let logger = seeded_logger();
        let json = logger.to_json("p1", Actor::System).unwrap().unwrap();
        let err = logger.import_json(&json, Actor::System).unwrap_err();
        assert!(matches!(err, ComplianceError::ImportConflict { .. }));
    }

    #[test]
    fn test_import_rejects_tampered_payload() {
        let source = seeded_logger();
        let json = source.to_json("p1", Actor::System).unwrap().unwrap();
        let mut doc: JsonValue = serde_json::from_str(&json).unwrap();
        doc["entries"][1]["details"]["suggestionId"] = json!("forged");
        let tampered = serde_json::to_string(&doc).unwrap();

        let store = Arc::new(MemoryStore::new());
        let target = AuditLogger::new(store.clone());
        let err = target.import_json(&tampered, Actor::System).unwrap_err();
        assert!(matches!(err, ComplianceError::MalformedImport { .. }));
        assert!(store.get(&audit_log_key("p1")).unwrap().is_none());
    }

    #[test]
    fn test_import_rejects_garbage_and_group_exports() {
        let target = AuditLogger::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            target.import_json("not json", Actor::System),
            Err(ComplianceError::MalformedImport { .. })
        ));

        let source = seeded_logger();
        let group = source.export_group_json("p1", "dq", Actor::System).unwrap().unwrap();
        assert!(matches!(
            target.import_json(&group, Actor::System),
            Err(ComplianceError::MalformedImport { .. })
        ));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }
}
