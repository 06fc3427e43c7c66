//! Trend tracking data: snapshots and the metrics derived from them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score change (in points) beyond which a trend is no longer stable
pub const TREND_STABILITY_BAND: i32 = 2;

/// Persisted, timestamped copy of compliance scores
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSnapshot {
    /// Unique identifier for this snapshot
    pub id: Uuid,

    /// Subject the scores belong to
    pub subject_id: String,

    /// Version of the subject that was validated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,

    /// When the snapshot was recorded
    pub timestamp: DateTime<Utc>,

    /// Compliance score per rule group
    pub scores: BTreeMap<String, u8>,

    /// Issue count (excluding success confirmations) per rule group
    #[serde(default)]
    pub group_issue_counts: BTreeMap<String, usize>,

    /// Issues across all groups
    pub total_issues: usize,

    /// Critical issues across all groups
    pub critical_issues: usize,

    /// Warnings across all groups
    pub warning_issues: usize,

    /// Informational issues across all groups
    pub info_issues: usize,
}

impl ValidationSnapshot {
    /// Mean of all group scores, 0 when there are none
    pub fn average_score(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.values().map(|s| *s as f64).sum::<f64>() / self.scores.len() as f64
    }

    /// Score for `group_id`, 0 when the group was not evaluated
    pub fn score_for(&self, group_id: &str) -> u8 {
        self.scores.get(group_id).copied().unwrap_or(0)
    }
}

/// Direction of a score change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

impl TrendDirection {
    /// `improving` above +2, `declining` below -2, otherwise `stable`
    pub fn classify(score_change: i32) -> Self {
        if score_change > TREND_STABILITY_BAND {
            TrendDirection::Improving
        } else if score_change < -TREND_STABILITY_BAND {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Improving => write!(f, "improving"),
            TrendDirection::Declining => write!(f, "declining"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Latest-vs-previous comparison for one rule group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendMetrics {
    /// Rule group being tracked
    pub group_id: String,

    /// Score in the newest snapshot
    pub current_score: u8,

    /// Score in the snapshot before it, if there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_score: Option<u8>,

    /// Current minus previous score; 0 without a previous snapshot
    pub score_change: i32,

    /// Change relative to the previous score; 0 when that score was 0
    pub score_change_percent: f64,

    /// Classification of `score_change`
    pub trend: TrendDirection,

    /// Snapshots held for the subject
    pub snapshot_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Oldest-vs-newest comparison across all groups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverallTrend {
    /// Snapshots held for the subject
    pub total_snapshots: usize,

    /// Oldest and newest snapshot timestamps
    pub date_range: DateRange,

    /// Average score of the newest snapshot
    pub average_score: f64,

    /// Newest average minus oldest average
    pub score_improvement: f64,

    /// `(oldTotal - newTotal) / oldTotal`, 0 when the oldest snapshot had no issues
    pub issue_reduction_rate: f64,

    /// Per-group metrics for every group seen in any snapshot, by group id
    pub groups: Vec<TrendMetrics>,
}

/// One charting point, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,

    /// Group score, or the average over all groups
    pub score: f64,

    /// Issues for the group, or across all groups
    pub issue_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueDelta {
    pub total: i64,
    pub critical: i64,
    pub warning: i64,
    pub info: i64,
}

/// Difference between the latest snapshots of two versions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub version1_snapshot: ValidationSnapshot,
    pub version2_snapshot: ValidationSnapshot,
    /// v2 score minus v1 score per group (missing scores count as 0)
    pub score_changes: BTreeMap<String, i32>,
    pub issue_changes: IssueDelta,
}

/// A subject's snapshot ring as persisted under `trend:<subjectId>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendHistory {
    pub subject_id: String,
    /// Oldest first
    pub snapshots: Vec<ValidationSnapshot>,
}

impl TrendHistory {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            snapshots: Vec::new(),
        }
    }

    /// Drop the oldest snapshots until at most `cap` remain
    pub fn trim_to(&mut self, cap: usize) -> usize {
        let excess = self.snapshots.len().saturating_sub(cap);
        if excess > 0 {
            self.snapshots.drain(..excess);
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_classification() {
        assert_eq!(TrendDirection::classify(15), TrendDirection::Improving);
        assert_eq!(TrendDirection::classify(3), TrendDirection::Improving);
        assert_eq!(TrendDirection::classify(2), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(-1), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(-2), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(-3), TrendDirection::Declining);
        assert_eq!(TrendDirection::classify(-25), TrendDirection::Declining);
    }

    #[test]
    fn test_average_score() {
        let mut snapshot = ValidationSnapshot {
            id: Uuid::new_v4(),
            subject_id: "p1".to_string(),
            version_tag: None,
            timestamp: Utc::now(),
            scores: BTreeMap::new(),
            group_issue_counts: BTreeMap::new(),
            total_issues: 0,
            critical_issues: 0,
            warning_issues: 0,
            info_issues: 0,
        };
        assert_eq!(snapshot.average_score(), 0.0);

        snapshot.scores.insert("a".to_string(), 60);
        snapshot.scores.insert("b".to_string(), 90);
        assert_eq!(snapshot.average_score(), 75.0);
        assert_eq!(snapshot.score_for("a"), 60);
        assert_eq!(snapshot.score_for("missing"), 0);
    }
}
