use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::audit::{AuditLogger, IntegrityReport};
use crate::config::ComplianceConfig;
use crate::logging::LogLevel;
use crate::models::{Actor, AuditAction};
use crate::storage::{FileStore, KeyValueStore};
use crate::trend::TrendTracker;

/// Compliance Control - inspect, verify and export compliance audit data
#[derive(Parser, Debug)]
#[command(name = "compliancectl")]
#[command(about = "Inspect, verify and export compliance audit logs and trends")]
#[command(version)]
pub struct Cli {
    /// Directory holding the persisted audit logs and trend histories
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (.toml, .yaml or .json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the most recent audit entries, newest first
    Log {
        subject: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show audit counters and per-group suggestion statistics
    Stats { subject: String },
    /// Verify the audit hash chain
    Verify {
        subject: String,
        /// Include archived segments and require a genesis entry
        #[arg(long)]
        full: bool,
    },
    /// Export the audit log
    Export {
        subject: String,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Only export entries of this group (JSON only)
        #[arg(long)]
        group: Option<String>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import a JSON export into a subject with no audit log
    Import { file: PathBuf },
    /// Append an audit entry
    Append {
        subject: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        module: String,
        /// e.g. SETTINGS_CHANGED or settings-changed
        #[arg(long)]
        action: AuditAction,
        #[arg(long, requires = "user_name")]
        user_id: Option<String>,
        #[arg(long, requires = "user_id")]
        user_name: Option<String>,
        /// JSON object with event details
        #[arg(long)]
        details: Option<String>,
    },
    /// Show trend metrics for a subject or one of its groups
    Trend {
        subject: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the score time series, oldest first
    Series {
        subject: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Compare the latest snapshots of two versions
    Compare {
        subject: String,
        version1: String,
        version2: String,
    },
    /// Export trend snapshots as JSON
    ExportSnapshots {
        subject: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace a subject's trend snapshots from a JSON file
    ImportSnapshots { subject: String, file: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl Cli {
    /// Load the configuration file if given, then apply command-line overrides
    pub fn load_config(&self) -> Result<ComplianceConfig> {
        let mut config = match &self.config {
            Some(path) => ComplianceConfig::load(path)?,
            None => ComplianceConfig::default(),
        };
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("compliancectl"))
                .ok_or_else(|| anyhow!("Could not determine a data directory; pass --data-dir")),
        }
    }
}

struct Workspace {
    logger: AuditLogger,
    tracker: TrendTracker,
}

impl Workspace {
    fn open(data_dir: &Path, config: &ComplianceConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::new(data_dir)
                .with_context(|| format!("Failed to open data directory: {}", data_dir.display()))?,
        );
        let logger = AuditLogger::from_settings(Arc::clone(&store), &config.audit)?;
        let tracker = TrendTracker::from_settings(store, &config.trend);
        Ok(Self { logger, tracker })
    }
}

pub fn run_cli(cli: Cli, config: ComplianceConfig) -> Result<()> {
    let data_dir = cli.resolve_data_dir()?;
    let workspace = Workspace::open(&data_dir, &config)?;

    match cli.command {
        Commands::Log { subject, limit } => show_log(&workspace, &subject, limit),
        Commands::Stats { subject } => show_stats(&workspace, &subject),
        Commands::Verify { subject, full } => verify(&workspace, &subject, full),
        Commands::Export { subject, format, group, output } => {
            export_log(&workspace, &subject, format, group.as_deref(), output.as_deref())
        }
        Commands::Import { file } => import_log(&workspace, &file),
        Commands::Append { subject, group, module, action, user_id, user_name, details } => {
            let actor = match (user_id, user_name) {
                (Some(id), Some(name)) => Actor::user(id, name),
                _ => Actor::System,
            };
            append_entry(&workspace, &subject, &group, &module, action, actor, details.as_deref())
        }
        Commands::Trend { subject, group } => show_trend(&workspace, &subject, group.as_deref()),
        Commands::Series { subject, group } => show_series(&workspace, &subject, group.as_deref()),
        Commands::Compare { subject, version1, version2 } => compare(&workspace, &subject, &version1, &version2),
        Commands::ExportSnapshots { subject, output } => export_snapshots(&workspace, &subject, output.as_deref()),
        Commands::ImportSnapshots { subject, file } => import_snapshots(&workspace, &subject, &file),
    }
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("💾 Written to {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn show_log(workspace: &Workspace, subject: &str, limit: usize) -> Result<()> {
    println!("📋 Recent audit entries for '{}'...", subject);

    let entries = workspace.logger.recent_entries(subject, limit)?;
    if entries.is_empty() {
        println!("📭 No audit entries");
        return Ok(());
    }

    for entry in entries {
        let who = match &entry.actor {
            Actor::System => "System".to_string(),
            Actor::User { id, name } => format!("{} ({})", name, id),
        };
        println!("  🕒 {}  {}", entry.timestamp.format("%Y-%m-%d %H:%M:%S"), entry.action);
        println!("     Group: {}  Module: {}  Actor: {}", entry.group_id, entry.module, who);
        if entry.details.as_object().map_or(false, |d| !d.is_empty()) {
            println!("     Details: {}", entry.details);
        }
    }
    Ok(())
}

fn show_stats(workspace: &Workspace, subject: &str) -> Result<()> {
    let Some(stats) = workspace.logger.stats(subject)? else {
        println!("📭 No audit log for '{}'", subject);
        return Ok(());
    };

    println!("📊 Audit statistics for '{}':", subject);
    println!("  Suggestions: {} generated, {} accepted, {} dismissed",
        stats.total_suggestions, stats.accepted_suggestions, stats.dismissed_suggestions);
    println!("  Auto-fixes applied: {}", stats.auto_fixes_applied);
    println!("  Configuration changes: {}", stats.configuration_changes);
    println!("  Validation runs: {}", stats.validation_runs);
    if let Some(score) = stats.last_validation_score {
        println!("  Last validation score: {}", score);
    }

    let groups = workspace.logger.all_group_stats(subject)?;
    if !groups.is_empty() {
        println!("\n📦 Groups:");
        for group in groups {
            println!("  - {}: {} generated, {} accepted ({}%), {} dismissed",
                group.group_id, group.suggestions_generated, group.suggestions_accepted,
                group.acceptance_rate, group.suggestions_dismissed);
        }
    }
    Ok(())
}

fn print_report(report: &IntegrityReport) {
    match &report.failure {
        None => {
            println!("✅ Chain intact ({} entries checked)", report.entries_checked);
            if report.dangling_head {
                println!("   📝 First live entry links to archived history");
            }
        }
        Some(failure) => {
            println!("❌ Integrity check failed at entry {}: {:?}", failure.index, failure.kind);
            if let Some(id) = failure.entry_id {
                println!("   Entry: {}", id);
            }
        }
    }
}

fn verify(workspace: &Workspace, subject: &str, full: bool) -> Result<()> {
    println!("🔍 Verifying audit log for '{}'{}...", subject, if full { " (full history)" } else { "" });

    let report = if full {
        workspace.logger.verify_full_history(subject)?
    } else {
        workspace.logger.integrity_report(subject)?
    };
    print_report(&report);

    if report.is_valid() {
        Ok(())
    } else {
        Err(anyhow!("Audit log for '{}' failed verification", subject))
    }
}

fn export_log(
    workspace: &Workspace,
    subject: &str,
    format: ExportFormat,
    group: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let exported = match (format, group) {
        (ExportFormat::Json, None) => workspace.logger.to_json(subject, Actor::System)?,
        (ExportFormat::Json, Some(group)) => workspace.logger.export_group_json(subject, group, Actor::System)?,
        (ExportFormat::Csv, None) => workspace.logger.to_csv(subject, Actor::System)?,
        (ExportFormat::Csv, Some(_)) => return Err(anyhow!("--group is only supported for JSON exports")),
    };

    match exported {
        Some(content) => write_output(&content, output),
        None => Err(anyhow!("No audit log for '{}'", subject)),
    }
}

fn import_log(workspace: &Workspace, file: &Path) -> Result<()> {
    println!("📥 Importing audit log from {}...", file.display());
    let payload = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let entry = workspace.logger.import_json(&payload, Actor::System)?;
    println!("✅ Imported audit log for '{}'", entry.subject_id);
    Ok(())
}

fn append_entry(
    workspace: &Workspace,
    subject: &str,
    group: &str,
    module: &str,
    action: AuditAction,
    actor: Actor,
    details: Option<&str>,
) -> Result<()> {
    let details = match details {
        Some(raw) => serde_json::from_str(raw).context("--details must be valid JSON")?,
        None => serde_json::json!({}),
    };
    let entry = workspace.logger.append(subject, group, module, action, actor, details)?;
    println!("✅ Appended {} ({})", entry.action, entry.id);
    println!("   Hash: {}", entry.entry_hash);
    Ok(())
}

fn show_trend(workspace: &Workspace, subject: &str, group: Option<&str>) -> Result<()> {
    if let Some(group) = group {
        let Some(metrics) = workspace.tracker.trend_for_group(subject, group)? else {
            println!("📭 No snapshots for '{}'", subject);
            return Ok(());
        };
        println!("📈 {} / {}: {} ({:+} points, {:+.1}%)",
            subject, group, metrics.trend, metrics.score_change, metrics.score_change_percent);
        println!("   Current: {}  Previous: {}", metrics.current_score,
            metrics.previous_score.map_or("-".to_string(), |s| s.to_string()));
        return Ok(());
    }

    let Some(overall) = workspace.tracker.overall_trend(subject)? else {
        println!("📭 No snapshots for '{}'", subject);
        return Ok(());
    };
    println!("📈 Overall trend for '{}' ({} snapshots)", subject, overall.total_snapshots);
    println!("   Range: {} → {}", overall.date_range.start.format("%Y-%m-%d %H:%M"),
        overall.date_range.end.format("%Y-%m-%d %H:%M"));
    println!("   Average score: {:.1}  Improvement: {:+.1}", overall.average_score, overall.score_improvement);
    println!("   Issue reduction: {:.1}%", overall.issue_reduction_rate * 100.0);
    for group in overall.groups {
        println!("  - {}: {} ({} → {:+})", group.group_id, group.trend, group.current_score, group.score_change);
    }
    Ok(())
}

fn show_series(workspace: &Workspace, subject: &str, group: Option<&str>) -> Result<()> {
    let points = workspace.tracker.time_series(subject, group)?;
    if points.is_empty() {
        println!("📭 No snapshots for '{}'", subject);
        return Ok(());
    }
    println!("timestamp,score,issues");
    for point in points {
        println!("{},{:.1},{}", point.timestamp.to_rfc3339(), point.score, point.issue_count);
    }
    Ok(())
}

fn compare(workspace: &Workspace, subject: &str, version1: &str, version2: &str) -> Result<()> {
    let Some(comparison) = workspace.tracker.compare_versions(subject, version1, version2)? else {
        println!("📭 Need snapshots for both '{}' and '{}'", version1, version2);
        return Ok(());
    };

    println!("🔀 {} → {}", version1, version2);
    for (group, change) in &comparison.score_changes {
        println!("  - {}: {:+}", group, change);
    }
    let issues = &comparison.issue_changes;
    println!("  Issues: total {:+}, critical {:+}, warning {:+}, info {:+}",
        issues.total, issues.critical, issues.warning, issues.info);
    Ok(())
}

fn export_snapshots(workspace: &Workspace, subject: &str, output: Option<&Path>) -> Result<()> {
    match workspace.tracker.export_snapshots(subject)? {
        Some(content) => write_output(&content, output),
        None => Err(anyhow!("No snapshots for '{}'", subject)),
    }
}

fn import_snapshots(workspace: &Workspace, subject: &str, file: &Path) -> Result<()> {
    println!("📥 Importing trend snapshots from {}...", file.display());
    let payload = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let kept = workspace.tracker.import_snapshots(subject, &payload)?;
    println!("✅ Imported {} snapshot(s) for '{}'", kept, subject);
    Ok(())
}
