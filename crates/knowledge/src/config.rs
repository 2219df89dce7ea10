//! Ledger configuration management.
//!
//! Settings live in `.reimburse/ledger/config.yaml`. Every section and field
//! is optional; missing values fall back to defaults.

use crate::embeddings::EmbeddingConfig;
use crate::query::predicate::NameMatch;
use reimburse_core::config::STATE_DIR;
use reimburse_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

/// Vector index tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// At or below this many candidates the search is exact
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: usize,

    /// Upper bound on the number of clusters
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    /// k-means refinement passes per training
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,
}

fn default_exact_threshold() -> usize {
    256
}

fn default_max_clusters() -> usize {
    64
}

fn default_kmeans_iterations() -> usize {
    8
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exact_threshold: default_exact_threshold(),
            max_clusters: default_max_clusters(),
            kmeans_iterations: default_kmeans_iterations(),
        }
    }
}

/// Batch pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Maximum items judged at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Judgment attempts per item, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for one judgment call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Overall batch deadline; unscheduled items are cancelled when it passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,

    /// Maximum characters of the normalized excerpt that gets embedded
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_excerpt_max_chars() -> usize {
    2_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            call_timeout_ms: default_call_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            deadline_secs: None,
            excerpt_max_chars: default_excerpt_max_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// First day of the week for "this week" / "last week".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

/// Query planner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    /// Results returned per query
    #[serde(default = "default_k")]
    pub k: usize,

    /// Clusters probed before widening
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    #[serde(default)]
    pub name_match: NameMatch,

    #[serde(default)]
    pub week_start: WeekStart,
}

fn default_k() -> usize {
    15
}

fn default_nprobe() -> usize {
    4
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            nprobe: default_nprobe(),
            name_match: NameMatch::default(),
            week_start: WeekStart::default(),
        }
    }
}

impl LedgerConfig {
    /// Load the ledger config, falling back to defaults when no file exists.
    pub fn load(workspace: &Path) -> AppResult<Self> {
        let config_path = get_config_path(workspace);

        if !config_path.exists() {
            tracing::debug!("No ledger config at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: LedgerConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        config.validate()?;
        tracing::debug!("Loaded ledger config from {:?}", config_path);
        Ok(config)
    }

    /// Write the config, creating the ledger directory if needed.
    pub fn save(&self, workspace: &Path) -> AppResult<()> {
        let config_path = get_config_path(workspace);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create ledger directory: {}", e))
            })?;
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(&config_path, yaml).map_err(|e| {
            AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Saved ledger config to {:?}", config_path);
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        self.embedding.validate()?;

        if self.pipeline.concurrency == 0 {
            return Err(AppError::Config(
                "pipeline.concurrency must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(AppError::Config(
                "pipeline.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.call_timeout_ms == 0 {
            return Err(AppError::Config(
                "pipeline.call_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.excerpt_max_chars == 0 {
            return Err(AppError::Config(
                "pipeline.excerpt_max_chars must be greater than zero".to_string(),
            ));
        }
        if self.query.k == 0 {
            return Err(AppError::Config("query.k must be greater than zero".to_string()));
        }
        if self.index.max_clusters == 0 {
            return Err(AppError::Config(
                "index.max_clusters must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Directory holding ledger state.
pub fn get_ledger_dir(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("ledger")
}

/// Path to the ledger config file.
pub fn get_config_path(workspace: &Path) -> PathBuf {
    get_ledger_dir(workspace).join("config.yaml")
}

/// Path to the record snapshot.
pub fn get_snapshot_path(workspace: &Path) -> PathBuf {
    get_ledger_dir(workspace).join("snapshot.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let config = LedgerConfig::load(temp.path()).unwrap();

        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.query.k, 15);
        assert_eq!(config.pipeline.concurrency, 4);
        assert_eq!(config.query.week_start, WeekStart::Monday);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let mut config = LedgerConfig::default();
        config.pipeline.concurrency = 8;
        config.pipeline.deadline_secs = Some(120);
        config.query.name_match = NameMatch::Exact;

        config.save(temp.path()).unwrap();

        let loaded = LedgerConfig::load(temp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = get_config_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "query:\n  nprobe: 9\n  week_start: sunday\n").unwrap();

        let loaded = LedgerConfig::load(temp.path()).unwrap();
        assert_eq!(loaded.query.nprobe, 9);
        assert_eq!(loaded.query.week_start, WeekStart::Sunday);
        assert_eq!(loaded.query.k, 15);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp = TempDir::new().unwrap();
        let path = get_config_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "pipeline:\n  concurrency: 0\n").unwrap();

        assert!(matches!(
            LedgerConfig::load(temp.path()),
            Err(AppError::Config(_))
        ));
    }
}
