//! FactVault configuration management

use crate::error::{Error, Result};
use crate::topics::{default_topic_rules, TopicRule, DEFAULT_PHRASE_WEIGHT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main FactVault configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactVaultConfig {
    /// Duplicate detection configuration
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Topic classification configuration
    #[serde(default)]
    pub topics: TopicConfig,

    /// Secondary store replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Primary store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch import configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FactVaultConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.dedup.validate()?;

        if self.topics.phrase_weight == 0 {
            return Err(Error::Config(
                "topics.phrase_weight must be at least 1".to_string(),
            ));
        }
        if self.replication.upload_timeout_ms == 0 || self.replication.rebuild_timeout_ms == 0 {
            return Err(Error::Config(
                "replication timeouts must be greater than zero".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(Error::Config(
                "batch.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Duplicate detection configuration
///
/// The semantic score is `string_weight * string similarity + term_weight *
/// key-term overlap`, compared against `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum semantic score for a near-duplicate
    pub threshold: f64,

    /// Weight of the character similarity component
    pub string_weight: f64,

    /// Weight of the key-term overlap component
    pub term_weight: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            string_weight: 0.6,
            term_weight: 0.4,
        }
    }
}

impl DedupConfig {
    /// Check threshold and weight ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::Config(format!(
                "dedup.threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.string_weight < 0.0 || self.term_weight < 0.0 {
            return Err(Error::Config(
                "dedup weights must not be negative".to_string(),
            ));
        }
        if self.string_weight + self.term_weight <= 0.0 {
            return Err(Error::Config(
                "dedup weights must not both be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Topic classification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Weight of a phrase hit (keywords weigh 1)
    pub phrase_weight: u32,

    /// Rule table
    pub rules: Vec<TopicRule>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            phrase_weight: DEFAULT_PHRASE_WEIGHT,
            rules: default_topic_rules(),
        }
    }
}

/// Secondary graph store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Base URL of the graph store service
    pub base_url: Option<String>,

    /// Environment variable holding the bearer token
    pub api_key_env: Option<String>,

    /// Upper bound for a single upload in milliseconds
    pub upload_timeout_ms: u64,

    /// Upper bound for an index rebuild in milliseconds
    pub rebuild_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: None,
            upload_timeout_ms: 10_000,
            rebuild_timeout_ms: 120_000,
        }
    }
}

impl ReplicationConfig {
    /// Upload timeout as a `Duration`
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// Rebuild timeout as a `Duration`
    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_timeout_ms)
    }

    /// Resolve the bearer token from the configured environment variable.
    ///
    /// Tries the exact name first, then its UPPER_CASE form.
    pub fn resolve_api_key(&self) -> Option<String> {
        let name = self.api_key_env.as_ref()?;
        std::env::var(name)
            .or_else(|_| std::env::var(name.to_uppercase()))
            .ok()
    }
}

/// Primary store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory only
    Memory,

    /// One JSON file per record
    #[default]
    File,
}

/// Primary store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type
    pub backend: StorageBackend,

    /// Base directory for the file backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("factvault");

        Self {
            backend: StorageBackend::File,
            data_dir,
        }
    }
}

/// Batch import configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of items processed concurrently within a batch
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FactVaultConfig::default();
        assert_eq!(config.dedup.threshold, 0.8);
        assert_eq!(config.dedup.string_weight, 0.6);
        assert_eq!(config.dedup.term_weight, 0.4);
        assert_eq!(config.topics.phrase_weight, 2);
        assert!(!config.topics.rules.is_empty());
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.storage.data_dir.ends_with("factvault"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = FactVaultConfig::from_toml_str(
            r#"
            [dedup]
            threshold = 0.9

            [storage]
            backend = "memory"

            [replication]
            base_url = "http://localhost:9621"
            upload_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.dedup.threshold, 0.9);
        assert_eq!(config.dedup.string_weight, 0.6);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(
            config.replication.base_url.as_deref(),
            Some("http://localhost:9621")
        );
        assert_eq!(config.replication.upload_timeout(), Duration::from_millis(500));
        assert_eq!(config.replication.rebuild_timeout_ms, 120_000);
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let config = FactVaultConfig::from_toml_str(
            r#"
            [topics]
            phrase_weight = 3

            [[topics.rules]]
            label = "relationships"
            phrases = ["friend named"]
            "#,
        )
        .unwrap();

        assert_eq!(config.topics.phrase_weight, 3);
        assert_eq!(config.topics.rules.len(), 1);
        assert_eq!(config.topics.rules[0].label, "relationships");
    }

    #[test]
    fn test_invalid_values() {
        assert!(FactVaultConfig::from_toml_str("[dedup]\nthreshold = 1.5").is_err());
        assert!(FactVaultConfig::from_toml_str("[dedup]\nstring_weight = -0.1").is_err());
        assert!(FactVaultConfig::from_toml_str(
            "[dedup]\nstring_weight = 0.0\nterm_weight = 0.0"
        )
        .is_err());
        assert!(FactVaultConfig::from_toml_str("[batch]\nconcurrency = 0").is_err());
        assert!(FactVaultConfig::from_toml_str("[topics]\nphrase_weight = 0").is_err());
        assert!(FactVaultConfig::from_toml_str("[replication]\nupload_timeout_ms = 0").is_err());
        assert!(FactVaultConfig::from_toml_str("not toml at all [").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factvault.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\njson = true\n").unwrap();

        let config = FactVaultConfig::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        assert!(FactVaultConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_resolve_api_key() {
        std::env::set_var("FACTVAULT_TEST_GRAPH_KEY", "secret-token");
        let config = ReplicationConfig {
            api_key_env: Some("factvault_test_graph_key".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("secret-token"));
        assert!(ReplicationConfig::default().resolve_api_key().is_none());
    }
}
