use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::config::TrendSettings;
use crate::error::{ComplianceError, ComplianceResult};
use crate::models::{
    generate_id, DateRange, IssueDelta, OverallTrend, TimeSeriesPoint, TrendDirection, TrendHistory, TrendMetrics,
    ValidationResult, ValidationSnapshot, VersionComparison,
};
use crate::storage::{trend_key, KeyValueStore};
use crate::sync::lock;

/// Default number of snapshots kept per subject
pub const DEFAULT_MAX_SNAPSHOTS: usize = 100;

/// Records scored snapshots per subject and derives trends from them
pub struct TrendTracker {
    store: Arc<dyn KeyValueStore>,
    max_snapshots: usize,
    subject_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TrendTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            subject_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(store: Arc<dyn KeyValueStore>, settings: &TrendSettings) -> Self {
        Self::new(store).with_max_snapshots(settings.max_snapshots_per_subject)
    }

    /// Ring size per subject; values below 1 are raised to 1
    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots.max(1);
        self
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    fn subject_lock(&self, subject_id: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.subject_locks);
        Arc::clone(locks.entry(subject_id.to_string()).or_default())
    }

    fn load_history(&self, subject_id: &str) -> ComplianceResult<Option<TrendHistory>> {
        match self.store.get(&trend_key(subject_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_history(&self, history: &TrendHistory) -> ComplianceResult<()> {
        let bytes = serde_json::to_vec(history)?;
        self.store.set(&trend_key(&history.subject_id), &bytes)?;
        Ok(())
    }

    /// Snapshot the scores of `results` and append it to the subject's ring
    pub fn record_snapshot(
        &self,
        subject_id: &str,
        results: &[ValidationResult],
        version_tag: Option<&str>,
    ) -> ComplianceResult<ValidationSnapshot> {
        let mut snapshot = ValidationSnapshot {
            id: generate_id(),
            subject_id: subject_id.to_string(),
            version_tag: version_tag.map(str::to_string),
            timestamp: Utc::now(),
            scores: BTreeMap::new(),
            group_issue_counts: BTreeMap::new(),
            total_issues: 0,
            critical_issues: 0,
            warning_issues: 0,
            info_issues: 0,
        };
        for result in results {
            snapshot.scores.insert(result.group_id.clone(), result.compliance_score);
            *snapshot.group_issue_counts.entry(result.group_id.clone()).or_default() += result.total_issues;
            snapshot.total_issues += result.total_issues;
            snapshot.critical_issues += result.critical_count;
            snapshot.warning_issues += result.warning_count;
            snapshot.info_issues += result.info_count;
        }

        let subject_lock = self.subject_lock(subject_id);
        let _guard = lock(&subject_lock);

        let mut history = self
            .load_history(subject_id)?
            .unwrap_or_else(|| TrendHistory::new(subject_id));
        history.snapshots.push(snapshot.clone());
        let dropped = history.trim_to(self.max_snapshots);
        self.save_history(&history)?;

        tracing::debug!(subject_id, snapshot_id = %snapshot.id, dropped, "Recorded trend snapshot");
        Ok(snapshot)
    }

    /// Snapshots newest first, optionally limited
    pub fn snapshots(&self, subject_id: &str, limit: Option<usize>) -> ComplianceResult<Vec<ValidationSnapshot>> {
        let snapshots = self.load_history(subject_id)?.map(|h| h.snapshots).unwrap_or_default();
        let limit = limit.unwrap_or(snapshots.len());
        Ok(snapshots.into_iter().rev().take(limit).collect())
    }

    /// Latest-vs-previous metrics for one group
    pub fn trend_for_group(&self, subject_id: &str, group_id: &str) -> ComplianceResult<Option<TrendMetrics>> {
        let snapshots = self.snapshots(subject_id, None)?;
        Ok(group_metrics(&snapshots, group_id))
    }

    /// Oldest-vs-newest summary plus per-group metrics
    pub fn overall_trend(&self, subject_id: &str) -> ComplianceResult<Option<OverallTrend>> {
        let snapshots = self.snapshots(subject_id, None)?;
        let (Some(newest), Some(oldest)) = (snapshots.first(), snapshots.last()) else {
            return Ok(None);
        };

        let average_score = newest.average_score();
        let issue_reduction_rate = if oldest.total_issues > 0 {
            (oldest.total_issues as f64 - newest.total_issues as f64) / oldest.total_issues as f64
        } else {
            0.0
        };

        let group_ids: BTreeSet<&str> = snapshots
            .iter()
            .flat_map(|s| s.scores.keys().map(String::as_str))
            .collect();
        let groups = group_ids
            .into_iter()
            .filter_map(|group_id| group_metrics(&snapshots, group_id))
            .collect();

        Ok(Some(OverallTrend {
            total_snapshots: snapshots.len(),
            date_range: DateRange {
                start: oldest.timestamp,
                end: newest.timestamp,
            },
            average_score,
            score_improvement: average_score - oldest.average_score(),
            issue_reduction_rate,
            groups,
        }))
    }

    /// Charting points oldest first, for one group or averaged over all groups
    pub fn time_series(&self, subject_id: &str, group_id: Option<&str>) -> ComplianceResult<Vec<TimeSeriesPoint>> {
        let history = self.load_history(subject_id)?.map(|h| h.snapshots).unwrap_or_default();
        Ok(history
            .iter()
            .map(|snapshot| match group_id {
                Some(group_id) => TimeSeriesPoint {
                    timestamp: snapshot.timestamp,
                    score: snapshot.score_for(group_id) as f64,
                    issue_count: snapshot.group_issue_counts.get(group_id).copied().unwrap_or(0),
                },
                None => TimeSeriesPoint {
                    timestamp: snapshot.timestamp,
                    score: snapshot.average_score(),
                    issue_count: snapshot.total_issues,
                },
            })
            .collect())
    }

    /// Compare the latest snapshots tagged `version1` and `version2`
    pub fn compare_versions(
        &self,
        subject_id: &str,
        version1: &str,
        version2: &str,
    ) -> ComplianceResult<Option<VersionComparison>> {
        let snapshots = self.snapshots(subject_id, None)?;
        let latest = |version: &str| {
            snapshots
                .iter()
                .find(|s| s.version_tag.as_deref() == Some(version))
                .cloned()
        };
        let (Some(v1), Some(v2)) = (latest(version1), latest(version2)) else {
            return Ok(None);
        };

        let score_changes = v1
            .scores
            .keys()
            .chain(v2.scores.keys())
            .map(|group_id| {
                let change = v2.score_for(group_id) as i32 - v1.score_for(group_id) as i32;
                (group_id.clone(), change)
            })
            .collect();
        let delta = |a: usize, b: usize| b as i64 - a as i64;
        let issue_changes = IssueDelta {
            total: delta(v1.total_issues, v2.total_issues),
            critical: delta(v1.critical_issues, v2.critical_issues),
            warning: delta(v1.warning_issues, v2.warning_issues),
            info: delta(v1.info_issues, v2.info_issues),
        };

        Ok(Some(VersionComparison {
            version1_snapshot: v1,
            version2_snapshot: v2,
            score_changes,
            issue_changes,
        }))
    }

    /// Remove every snapshot for the subject
    pub fn clear_subject(&self, subject_id: &str) -> ComplianceResult<()> {
        let subject_lock = self.subject_lock(subject_id);
        let _guard = lock(&subject_lock);
        self.store.remove(&trend_key(subject_id))?;
        tracing::info!(subject_id, "Cleared trend snapshots");
        Ok(())
    }

    /// Snapshots as a pretty JSON array, oldest first
    pub fn export_snapshots(&self, subject_id: &str) -> ComplianceResult<Option<String>> {
        match self.load_history(subject_id)? {
            Some(history) => Ok(Some(serde_json::to_string_pretty(&history.snapshots)?)),
            None => Ok(None),
        }
    }

    /// Replace the subject's snapshots with an exported array
    ///
    /// Snapshots are ordered by timestamp and the ring cap is applied. Returns
    /// the number kept. Nothing is written if any snapshot is invalid.
    pub fn import_snapshots(&self, subject_id: &str, payload: &str) -> ComplianceResult<usize> {
        let mut snapshots: Vec<ValidationSnapshot> =
            serde_json::from_str(payload).map_err(|e| ComplianceError::MalformedImport {
                reason: format!("invalid snapshot array: {}", e),
            })?;
        if let Some(foreign) = snapshots.iter().find(|s| s.subject_id != subject_id) {
            return Err(ComplianceError::MalformedImport {
                reason: format!("snapshot {} belongs to subject '{}'", foreign.id, foreign.subject_id),
            });
        }
        snapshots.sort_by_key(|s| s.timestamp);

        let subject_lock = self.subject_lock(subject_id);
        let _guard = lock(&subject_lock);

        let mut history = TrendHistory::new(subject_id);
        history.snapshots = snapshots;
        history.trim_to(self.max_snapshots);
        self.save_history(&history)?;

        tracing::info!(subject_id, imported = history.snapshots.len(), "Imported trend snapshots");
        Ok(history.snapshots.len())
    }
}

/// Metrics for `group_id` from snapshots ordered newest first
fn group_metrics(snapshots: &[ValidationSnapshot], group_id: &str) -> Option<TrendMetrics> {
    let current = snapshots.first()?;
    let current_score = current.score_for(group_id);
    let previous_score = snapshots.get(1).and_then(|s| s.scores.get(group_id).copied());

    let score_change = previous_score.map_or(0, |prev| current_score as i32 - prev as i32);
    let score_change_percent = match previous_score {
        Some(prev) if prev > 0 => score_change as f64 / prev as f64 * 100.0,
        _ => 0.0,
    };

    Some(TrendMetrics {
        group_id: group_id.to_string(),
        current_score,
        previous_score,
        score_change,
        score_change_percent,
        trend: TrendDirection::classify(score_change),
        snapshot_count: snapshots.len(),
    })
}

impl std::fmt::Debug for TrendTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendTracker")
            .field("max_snapshots", &self.max_snapshots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, ValidationIssue};
    use crate::storage::MemoryStore;

    fn tracker() -> TrendTracker {
        TrendTracker::new(Arc::new(MemoryStore::new()))
    }

    fn scored(group_id: &str, score: u8) -> ValidationResult {
        let mut result = ValidationResult::empty(group_id);
        result.compliance_score = score;
        result
    }

    fn with_issues(group_id: &str, infos: usize, score: u8) -> ValidationResult {
        let issues = (0..infos)
            .map(|i| ValidationIssue::new(format!("i{}", i), group_id, Severity::Info, "data-quality", "i"))
            .collect();
        let mut result = ValidationResult::from_issues(group_id, issues, 0);
        result.compliance_score = score;
        result
    }

    fn trend_after(scores: &[u8]) -> TrendMetrics {
        let tracker = tracker();
        for score in scores {
            tracker.record_snapshot("p1", &[scored("dq", *score)], None).unwrap();
        }
        tracker.trend_for_group("p1", "dq").unwrap().unwrap()
    }

    #[test]
    fn test_trend_classification_from_snapshots() {
        let improving = trend_after(&[70, 85]);
        assert_eq!(improving.trend, TrendDirection::Improving);
        assert_eq!(improving.score_change, 15);
        assert_eq!(improving.previous_score, Some(70));
        assert!((improving.score_change_percent - 21.428_571).abs() < 1e-4);

        let stable = trend_after(&[85, 84]);
        assert_eq!(stable.trend, TrendDirection::Stable);
        assert_eq!(stable.score_change, -1);

        let declining = trend_after(&[85, 60]);
        assert_eq!(declining.trend, TrendDirection::Declining);
        assert_eq!(declining.score_change, -25);
    }

    #[test]
    fn test_single_snapshot_is_stable() {
        let metrics = trend_after(&[90]);
        assert_eq!(metrics.current_score, 90);
        assert_eq!(metrics.previous_score, None);
        assert_eq!(metrics.score_change, 0);
        assert_eq!(metrics.score_change_percent, 0.0);
        assert_eq!(metrics.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_no_snapshots_means_no_data() {
        let tracker = tracker();
        assert!(tracker.trend_for_group("p1", "dq").unwrap().is_none());
        assert!(tracker.overall_trend("p1").unwrap().is_none());
        assert!(tracker.time_series("p1", None).unwrap().is_empty());
        assert!(tracker.export_snapshots("p1").unwrap().is_none());
    }

    #[test]
    fn test_overall_trend() {
        let tracker = tracker();
        tracker
            .record_snapshot("p1", &[with_issues("a", 6, 60), with_issues("b", 4, 70)], None)
            .unwrap();
        tracker
            .record_snapshot("p1", &[with_issues("a", 1, 75), with_issues("b", 1, 80)], None)
            .unwrap();
        tracker
            .record_snapshot("p1", &[with_issues("a", 2, 80), with_issues("b", 2, 90)], None)
            .unwrap();

        let overall = tracker.overall_trend("p1").unwrap().unwrap();
        assert_eq!(overall.total_snapshots, 3);
        assert_eq!(overall.average_score, 85.0);
        assert_eq!(overall.score_improvement, 20.0);
        assert!((overall.issue_reduction_rate - 0.6).abs() < 1e-9);
        assert!(overall.date_range.start <= overall.date_range.end);

        let groups: Vec<&str> = overall.groups.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(groups, vec!["a", "b"]);
        assert_eq!(overall.groups[0].score_change, 5);
        assert_eq!(overall.groups[1].score_change, 10);
    }

    #[test]
    fn test_time_series_is_oldest_first() {
        let tracker = tracker();
        tracker
            .record_snapshot("p1", &[with_issues("a", 3, 70), with_issues("b", 1, 90)], None)
            .unwrap();
        tracker.record_snapshot("p1", &[with_issues("a", 1, 95)], None).unwrap();

        let overall = tracker.time_series("p1", None).unwrap();
        assert_eq!(overall.len(), 2);
        assert_eq!(overall[0].score, 80.0);
        assert_eq!(overall[0].issue_count, 4);
        assert_eq!(overall[1].score, 95.0);

        let group_b = tracker.time_series("p1", Some("b")).unwrap();
        assert_eq!(group_b[0].score, 90.0);
        assert_eq!(group_b[0].issue_count, 1);
        assert_eq!(group_b[1].score, 0.0);
        assert_eq!(group_b[1].issue_count, 0);
    }

    #[test]
    fn test_ring_is_capped() {
        let tracker = TrendTracker::new(Arc::new(MemoryStore::new())).with_max_snapshots(3);
        for score in [10, 20, 30, 40, 50] {
            tracker.record_snapshot("p1", &[scored("dq", score)], None).unwrap();
        }

        let snapshots = tracker.snapshots("p1", None).unwrap();
        let scores: Vec<u8> = snapshots.iter().map(|s| s.score_for("dq")).collect();
        assert_eq!(scores, vec![50, 40, 30]);
        assert_eq!(tracker.snapshots("p1", Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_compare_versions_uses_latest_per_version() {
        let tracker = tracker();
        tracker
            .record_snapshot("p1", &[with_issues("a", 5, 50)], Some("v1"))
            .unwrap();
        tracker
            .record_snapshot("p1", &[with_issues("a", 4, 60), with_issues("b", 1, 70)], Some("v1"))
            .unwrap();
        tracker
            .record_snapshot("p1", &[with_issues("a", 1, 90), with_issues("c", 2, 40)], Some("v2"))
            .unwrap();

        let comparison = tracker.compare_versions("p1", "v1", "v2").unwrap().unwrap();
        assert_eq!(comparison.score_changes.get("a"), Some(&30));
        assert_eq!(comparison.score_changes.get("b"), Some(&-70));
        assert_eq!(comparison.score_changes.get("c"), Some(&40));
        assert_eq!(comparison.issue_changes.total, -2);
        assert_eq!(comparison.issue_changes.info, -2);

        assert!(tracker.compare_versions("p1", "v1", "v9").unwrap().is_none());
    }

    #[test]
    fn test_subjects_are_isolated_and_clearable() {
        let tracker = tracker();
        tracker.record_snapshot("p1", &[scored("dq", 80)], None).unwrap();
        tracker.record_snapshot("p2", &[scored("dq", 40)], None).unwrap();

        tracker.clear_subject("p1").unwrap();
        assert!(tracker.snapshots("p1", None).unwrap().is_empty());
        assert_eq!(tracker.snapshots("p2", None).unwrap().len(), 1);
    }

    #[test]
    fn test_export_import_snapshots() {
        let source = tracker();
        for score in [60, 70, 80] {
            source.record_snapshot("p1", &[scored("dq", score)], None).unwrap();
        }
        let exported = source.export_snapshots("p1").unwrap().unwrap();

        let target = TrendTracker::new(Arc::new(MemoryStore::new())).with_max_snapshots(2);
        target.record_snapshot("p1", &[scored("dq", 5)], None).unwrap();
        assert_eq!(target.import_snapshots("p1", &exported).unwrap(), 2);

        let scores: Vec<u8> = target
            .snapshots("p1", None)
            .unwrap()
            .iter()
            .map(|s| s.score_for("dq"))
            .collect();
        assert_eq!(scores, vec![80, 70]);
    }

    #[test]
    fn test_import_rejects_bad_payloads() {
        let tracker = tracker();
        tracker.record_snapshot("p1", &[scored("dq", 55)], None).unwrap();

        assert!(matches!(
            tracker.import_snapshots("p1", "{\"not\": \"an array\"}"),
            Err(ComplianceError::MalformedImport { .. })
        ));

        let other = tracker.export_snapshots("p1").unwrap().unwrap();
        assert!(matches!(
            tracker.import_snapshots("p2", &other),
            Err(ComplianceError::MalformedImport { .. })
        ));
        assert_eq!(tracker.snapshots("p1", None).unwrap()[0].score_for("dq"), 55);
        assert!(tracker.snapshots("p2", None).unwrap().is_empty());
    }
}
