use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LodeError, Result};

/// Top-level configuration for lode.
///
/// Loaded from `~/.lode/config.toml` by default. Every section falls back to
/// its defaults when omitted, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LodeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub distill: DistillConfig,
}

impl LodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LodeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values no pipeline can run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.distill.threshold) {
            return Err(LodeError::Validation(format!(
                "distill.threshold must be within [0, 1], got {}",
                self.distill.threshold
            )));
        }
        if self.embedding.max_concurrency == 0 || self.distill.max_concurrency == 0 {
            return Err(LodeError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.embedding.timeout_secs == 0 || self.distill.timeout_secs == 0 {
            return Err(LodeError::Validation(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.embedding.first_insert_attempts == 0 {
            return Err(LodeError::Validation(
                "embedding.first_insert_attempts must be at least 1".to_string(),
            ));
        }
        if self.distill.no_info.phrase.trim().is_empty() {
            return Err(LodeError::Validation(
                "distill.no_info.phrase must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base directory that relative index paths are resolved against.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.lode/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How ingestion treats a passage whose embedding call failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every failure is written to the error log and never retried.
    #[default]
    Permanent,
    /// Transient failures are left out of the error log and retried next run.
    RetryTransient,
}

/// Which backend serves a provider capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Mock,
}

/// Vector index store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory of plain-text passages, one file per passage.
    pub passages_dir: String,
    /// Binary index blob.
    pub index_path: String,
    /// JSON mapping of index positions to passage keys.
    pub mapping_path: String,
    /// CSV log of passages whose embedding failed.
    pub error_log_path: String,
    /// Extension of passage files (without the dot).
    pub passage_extension: String,
    /// Skip passages whose key is already in the mapping.
    pub skip_existing: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            passages_dir: "passages".to_string(),
            index_path: "vector_index.bin".to_string(),
            mapping_path: "vector_mapping.json".to_string(),
            error_log_path: "embed_errors.csv".to_string(),
            passage_extension: "txt".to_string(),
            skip_existing: true,
            failure_policy: FailurePolicy::Permanent,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum embedding calls in flight during ingestion.
    pub max_concurrency: usize,
    /// Attempts allowed for the embedding that fixes the index dimension.
    pub first_insert_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-large".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_concurrency: 4,
            first_insert_attempts: 3,
        }
    }
}

/// Distillation provider and filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Maximum hits distilled concurrently.
    pub max_concurrency: usize,
    /// Similarity to the no-information phrase at which a hit is dropped.
    pub threshold: f64,
    /// Number of hits retrieved when no `--k` is given.
    pub default_top_k: usize,
    #[serde(default)]
    pub no_info: NoInfoConfig,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            max_concurrency: 4,
            threshold: 0.95,
            default_top_k: 5,
            no_info: NoInfoConfig::default(),
        }
    }
}

/// Canonical "no relevant information" phrase and its normalization rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoInfoConfig {
    pub phrase: String,
    /// Trailing punctuation stripped before the exact comparison.
    pub strip_suffixes: Vec<String>,
    pub case_fold: bool,
}

impl Default for NoInfoConfig {
    fn default() -> Self {
        Self {
            phrase: "there is no relevant information".to_string(),
            strip_suffixes: vec![".".to_string(), "。".to_string()],
            case_fold: true,
        }
    }
}
