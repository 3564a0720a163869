//! Configuration parsing and validation.
//!
//! The RAG core is configured via a TOML file (default: `./config/rag.toml`).
//! The config defines the store root, chunking parameters, retrieval tuning,
//! cache capacities, worker concurrency, and the local embedding model to
//! load.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            worker: WorkerConfig::default(),
            embedding: EmbeddingConfig::default(),
            router: RouterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root directory under which `rag/docs/<doc_id>/` folders are created.
    pub root: PathBuf,
    /// Per-document cap on staged source bytes before rejecting the upload.
    #[serde(default = "default_staging_cap")]
    pub staging_size_cap_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            staging_size_cap_bytes: default_staging_cap(),
        }
    }
}

fn default_staging_cap() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    350
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_context_per_doc_cap")]
    pub context_per_doc_cap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            context_max_chars: default_context_max_chars(),
            context_per_doc_cap: default_context_per_doc_cap(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_threshold() -> f64 {
    0.05
}
fn default_context_max_chars() -> usize {
    2_400
}
fn default_context_per_doc_cap() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_doc_cache_capacity")]
    pub doc_cache_capacity: usize,
    #[serde(default = "default_query_cache_capacity")]
    pub query_cache_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            doc_cache_capacity: default_doc_cache_capacity(),
            query_cache_capacity: default_query_cache_capacity(),
        }
    }
}

fn default_doc_cache_capacity() -> usize {
    8
}
fn default_query_cache_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent indexing jobs. Defaults to physical cores (min 2)
    /// when unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent: None }
    }
}

impl WorkerConfig {
    pub fn resolved_max_concurrent(&self) -> usize {
        self.max_concurrent
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the model's known dimensionality; required for unrecognized
    /// model names.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dims: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_batch_size() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    /// Score above which document context is injected even without a
    /// keyword match.
    #[serde(default = "default_inject_threshold")]
    pub inject_score_threshold: f64,
    /// Score below which a locked document is released (absent a keyword).
    #[serde(default = "default_release_threshold")]
    pub release_score_threshold: f64,
    /// Keywords suggesting document intent; defaults to the English set.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inject_score_threshold: default_inject_threshold(),
            release_score_threshold: default_release_threshold(),
            keywords: default_keywords(),
        }
    }
}

fn default_inject_threshold() -> f64 {
    0.35
}
fn default_release_threshold() -> f64 {
    0.25
}
fn default_keywords() -> Vec<String> {
    ["file", "document", "doc", "pdf", "resume", "uploaded"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.target_chars");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.context_max_chars < 400 {
        anyhow::bail!("retrieval.context_max_chars must be >= 400");
    }
    if config.cache.doc_cache_capacity == 0 || config.cache.query_cache_capacity == 0 {
        anyhow::bail!("cache capacities must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_target_chars() {
        let mut config = Config::default();
        config.chunking.target_chars = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [store]
            root = "/tmp/rag-data"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.root, PathBuf::from("/tmp/rag-data"));
        assert_eq!(config.chunking.target_chars, 800);
    }
}
