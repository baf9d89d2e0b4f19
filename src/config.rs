//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//! See `config/ainsights.example.toml` for a commented example.

use ainsights_core::index::DistanceMetric;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Seed for the `hash` provider.
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            seed: 0,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Dimension used by the `hash` provider when `embedding.dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 384;

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
    #[serde(default = "default_conversation_window")]
    pub conversation_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget_chars: default_context_budget(),
            conversation_window: default_conversation_window(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    6000
}
fn default_conversation_window() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `local` (Ollama) or `remote` (Gemini API).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    1
}
fn default_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl FilesystemConnectorConfig {
    /// Default globs rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.csv".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "hash" | "disabled" | "local" => {}
        "openai" | "ollama" => {
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.dims.is_none() {
                bail!(
                    "embedding.dims must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, disabled, openai, ollama, or local.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Generation
    match config.generation.backend.as_str() {
        "local" | "remote" => {}
        other => bail!(
            "Unknown generation backend: '{}'. Must be local or remote.",
            other
        ),
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.index.path, PathBuf::from("./data/index.json"));
        assert_eq!(cfg.index.metric, DistanceMetric::Cosine);
        assert_eq!(cfg.chunking.max_chars, 500);
        assert_eq!(cfg.chunking.overlap_chars, 50);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.conversation_window, 6);
        assert_eq!(cfg.generation.backend, "local");
        assert_eq!(cfg.generation.timeout_secs, 60);
        assert_eq!(cfg.generation.max_retries, 1);
        assert!(cfg.connectors.filesystem.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[index]
path = "/tmp/idx.json"
metric = "euclidean"

[chunking]
max_chars = 800
overlap_chars = 100

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[generation]
backend = "remote"
model = "gemini-pro"
timeout_secs = 20

[connectors.filesystem]
root = "./reports"
"#,
        )
        .unwrap();
        assert_eq!(cfg.index.metric, DistanceMetric::Euclidean);
        assert_eq!(cfg.embedding.dims, Some(768));
        assert_eq!(cfg.generation.backend, "remote");
        let fs = cfg.connectors.filesystem.unwrap();
        assert_eq!(fs.include_globs.len(), 3);
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        let err = parse_config("[chunking]\nmax_chars = 100\noverlap_chars = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(parse_config("[generation]\nbackend = \"cloud9\"\n").is_err());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse_config(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        )
        .is_ok());
    }

    #[test]
    fn test_rejects_unknown_metric() {
        assert!(parse_config("[index]\nmetric = \"manhattan\"\n").is_err());
    }
}
