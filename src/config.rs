//! TOML configuration.
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults below. [`load_config`] parses and validates a file, and the CLI
//! uses [`Config::default`] when no `--config` is given.

use anyhow::{bail, Context, Result};
use evidex_core::chunk::{ChunkingParams, DEFAULT_CHUNK_SIZE, DEFAULT_SENTENCE_OVERLAP};
use evidex_core::embedding::EncodeOptions;
use evidex_core::search::{RetrieverParams, DEFAULT_ALPHA, DEFAULT_BM25_TOP_K, DEFAULT_DENSE_TOP_K};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.markdown", "**/*.txt", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|g| g.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_sentence_overlap")]
    pub sentence_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            sentence_overlap: default_sentence_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams::new(self.chunk_size, self.sentence_overlap)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_sentence_overlap() -> usize {
    DEFAULT_SENTENCE_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_dense_top_k")]
    pub dense_top_k: usize,
    #[serde(default = "default_bm25_top_k")]
    pub bm25_top_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            dense_top_k: default_dense_top_k(),
            bm25_top_k: default_bm25_top_k(),
            top_k: default_top_k(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrieverParams {
        RetrieverParams {
            dense_top_k: self.dense_top_k,
            bm25_top_k: self.bm25_top_k,
            alpha: self.alpha,
        }
    }
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}
fn default_dense_top_k() -> usize {
    DEFAULT_DENSE_TOP_K
}
fn default_bm25_top_k() -> usize {
    DEFAULT_BM25_TOP_K
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: Some(DEFAULT_HASH_DIMS),
            batch_size: default_batch_size(),
            normalize: default_normalize(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            batch_size: self.batch_size,
            normalize: self.normalize,
            timeout: self.timeout(),
        }
    }
}

pub const DEFAULT_HASH_DIMS: usize = 256;

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_normalize() -> bool {
    true
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default = "default_thresholds")]
    pub top_k_thresholds: Vec<usize>,
    /// Fold the existing log into the aggregates when the logger opens.
    #[serde(default)]
    pub replay_on_start: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            top_k_thresholds: default_thresholds(),
            replay_on_start: false,
        }
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/rag_metrics.jsonl")
}
fn default_thresholds() -> Vec<usize> {
    vec![1, 3, 5]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvidenceConfig {
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_max_snippet_chars() -> usize {
    160
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let retrieval = &config.retrieval;
    if !(0.0..=1.0).contains(&retrieval.alpha) {
        bail!("retrieval.alpha must be in [0.0, 1.0]");
    }
    if retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.dense_top_k < 1 || retrieval.bm25_top_k < 1 {
        bail!("retrieval.dense_top_k and retrieval.bm25_top_k must be >= 1");
    }

    let embedding = &config.embedding;
    if embedding.batch_size < 1 {
        bail!("embedding.batch_size must be >= 1");
    }
    match embedding.provider.as_str() {
        "hash" => {
            if embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'hash'");
            }
        }
        "openai" | "ollama" => {
            if embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }

    let thresholds = &config.metrics.top_k_thresholds;
    if thresholds.is_empty() || thresholds.contains(&0) {
        bail!("metrics.top_k_thresholds must be non-empty and every value >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.cache_dir, PathBuf::from("./data/index"));
        assert_eq!(config.chunking.params(), ChunkingParams::new(280, 1));
        assert_eq!(config.retrieval.params(), RetrieverParams::default());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.metrics.top_k_thresholds, vec![1, 3, 5]);
        assert!(!config.metrics.replay_on_start);
        assert_eq!(config.evidence.max_snippet_chars, 160);
        assert_eq!(
            config.embedding.encode_options().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
[chunking]
chunk_size = 220

[retrieval]
alpha = 0.25

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://gpu-box:11434"
timeout_secs = 0
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 220);
        assert_eq!(config.chunking.sentence_overlap, 1);
        assert_eq!(config.retrieval.alpha, 0.25);
        assert_eq!(config.retrieval.dense_top_k, 20);
        assert_eq!(config.embedding.url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.embedding.timeout(), None);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[retrieval]\nalpha = 1.5").is_err());
        assert!(parse_config("[retrieval]\ntop_k = 0").is_err());
        assert!(parse_config("[embedding]\nprovider = \"magic\"").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\ndims = 8").is_err());
        assert!(parse_config("[embedding]\nbatch_size = 0").is_err());
        assert!(parse_config("[metrics]\ntop_k_thresholds = []").is_err());
    }

    #[test]
    fn test_out_of_range_chunking_is_accepted() {
        let config = parse_config("[chunking]\nchunk_size = 5000\nsentence_overlap = 9").unwrap();
        assert_eq!(config.chunking.params().clamped(), ChunkingParams::new(800, 3));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/evidex.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
