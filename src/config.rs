//! Runtime configuration for the compliance subsystem

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::audit::HashAlgorithm;
use crate::logging::LogSettings;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some(ext) => Err(anyhow!("Unsupported file extension: {}", ext)),
            None => Err(anyhow!("No file extension found")),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComplianceConfig {
    pub validation: ValidationSettings,
    pub audit: AuditSettings,
    pub trend: TrendSettings,
    pub logging: LogSettings,
}

/// Cache and debounce timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationSettings {
    pub cache_ttl_ms: u64,
    pub debounce_delay_ms: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            debounce_delay_ms: 500,
        }
    }
}

impl ValidationSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

/// Audit log retention and hashing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditSettings {
    /// Live entries kept before older ones are archived
    pub max_live_entries: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Secret for `hmac-sha256`; required by that algorithm only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_key: Option<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_live_entries: 1_000,
            hash_algorithm: HashAlgorithm::Sha256,
            hmac_key: None,
        }
    }
}

/// Snapshot ring size
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendSettings {
    pub max_snapshots_per_subject: usize,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            max_snapshots_per_subject: 100,
        }
    }
}

impl ComplianceConfig {
    /// Load configuration from a JSON, YAML or TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = match ConfigFormat::from_extension(path)? {
            ConfigFormat::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            ConfigFormat::Toml => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the subsystem cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.audit.max_live_entries == 0 {
            return Err(anyhow!("audit.max_live_entries must be at least 1"));
        }
        if self.trend.max_snapshots_per_subject == 0 {
            return Err(anyhow!("trend.max_snapshots_per_subject must be at least 1"));
        }
        if self.audit.hash_algorithm == HashAlgorithm::HmacSha256
            && self.audit.hmac_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(anyhow!("audit.hmac_key is required when hash_algorithm is hmac-sha256"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ComplianceConfig::default();
        assert_eq!(config.validation.cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.validation.debounce_delay(), Duration::from_millis(500));
        assert_eq!(config.audit.max_live_entries, 1_000);
        assert_eq!(config.audit.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.trend.max_snapshots_per_subject, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_extension(Path::new("c.json")).unwrap(), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_extension(Path::new("c.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_extension(Path::new("c.toml")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_extension(Path::new("c.ini")).is_err());
        assert!(ConfigFormat::from_extension(Path::new("config")).is_err());
    }

    #[test]
    fn test_load_toml_with_partial_sections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compliance.toml");
        fs::write(
            &path,
            "[audit]\nmax_live_entries = 250\nhash_algorithm = \"rolling\"\n\n[validation]\ncache_ttl_ms = 1000\n",
        )
        .unwrap();

        let config = ComplianceConfig::load(&path).unwrap();
        assert_eq!(config.audit.max_live_entries, 250);
        assert_eq!(config.audit.hash_algorithm, HashAlgorithm::Rolling);
        assert_eq!(config.validation.cache_ttl_ms, 1000);
        assert_eq!(config.validation.debounce_delay_ms, 500);
        assert_eq!(config.trend.max_snapshots_per_subject, 100);
    }

    #[test]
    fn test_load_yaml_and_json() {
        let temp_dir = TempDir::new().unwrap();

        let yaml = temp_dir.path().join("compliance.yaml");
        fs::write(&yaml, "trend:\n  max_snapshots_per_subject: 10\n").unwrap();
        assert_eq!(ComplianceConfig::load(&yaml).unwrap().trend.max_snapshots_per_subject, 10);

        let json = temp_dir.path().join("compliance.json");
        fs::write(&json, r#"{"audit": {"hash_algorithm": "hmac-sha256", "hmac_key": "s3cret"}}"#).unwrap();
        let config = ComplianceConfig::load(&json).unwrap();
        assert_eq!(config.audit.hash_algorithm, HashAlgorithm::HmacSha256);
        assert_eq!(config.audit.hmac_key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_hmac_requires_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compliance.json");
        fs::write(&path, r#"{"audit": {"hash_algorithm": "hmac-sha256"}}"#).unwrap();
        assert!(ComplianceConfig::load(&path).is_err());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = ComplianceConfig::default();
        config.audit.max_live_entries = 0;
        assert!(config.validate().is_err());
    }
}
