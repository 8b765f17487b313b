//! TOML configuration for the `kb` binary and HTTP server.
//!
//! Every section and key has a default, so an empty file (or no file at
//! the default path) yields a working local setup: Ollama on
//! `localhost:11434` for embeddings and generation, Qdrant on
//! `localhost:6333` for the index.
//!
//! ```toml
//! [chunking]
//! chunk_size = 512
//! overlap = 50
//!
//! [retrieval]
//! top_k = 3
//! score_threshold = 0.5
//!
//! [embedding]
//! provider = "ollama"
//! model = "bge-m3"
//! dims = 1024
//!
//! [index]
//! backend = "qdrant"
//! on_dimension_mismatch = "recreate"
//! ```

use anyhow::{bail, Context, Result};
use knowledge_rag_core::chunk::ChunkParams;
use knowledge_rag_core::index::DimensionPolicy;
use serde::Deserialize;
use std::path::Path;

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/kb.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// How far back from a tentative cut to look for a sentence end.
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            boundary_window: default_boundary_window(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            boundary_window: self.boundary_window,
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}
fn default_boundary_window() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum cosine similarity for a hit to be used as context.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_score_threshold() -> f32 {
    0.5
}
fn default_max_context_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL of the backend. Defaults per provider when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches in flight at once during ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "bge-m3".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    16
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Ask reasoning models for a separate thinking trace.
    #[serde(default)]
    pub think: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            timeout_secs: default_generation_timeout(),
            think: false,
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub on_dimension_mismatch: DimensionPolicy,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
    /// Points per upsert request; keeps request bodies under the server limit.
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: default_index_url(),
            collection: default_collection(),
            on_dimension_mismatch: DimensionPolicy::default(),
            timeout_secs: default_index_timeout(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_index_backend() -> String {
    "qdrant".to_string()
}
fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "knowledge_base".to_string()
}
fn default_index_timeout() -> u64 {
    10
}
fn default_upsert_batch_size() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file at [`DEFAULT_CONFIG_PATH`]
/// yields the built-in defaults. Returns whether defaults were used.
pub fn load_or_default(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok((Config::default(), true));
    }
    Ok((load_config(path)?, false))
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !config.retrieval.score_threshold.is_finite() {
        bail!("retrieval.score_threshold must be a finite number");
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, or disabled.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.trim().is_empty() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be ollama or disabled.",
            other
        ),
    }

    match config.index.backend.as_str() {
        "qdrant" | "memory" => {}
        other => bail!("Unknown index backend: '{}'. Must be qdrant or memory.", other),
    }
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }
    if config.index.upsert_batch_size == 0 {
        bail!("index.upsert_batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.dims, 1024);
        assert_eq!(config.index.collection, "knowledge_base");
        assert_eq!(config.index.on_dimension_mismatch, DimensionPolicy::Recreate);
        assert_eq!(config.server.bind, "127.0.0.1:5000");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
[retrieval]
top_k = 7

[index]
backend = "memory"
on_dimension_mismatch = "reject"
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.retrieval.max_context_chars, 4000);
        assert_eq!(config.index.backend, "memory");
        assert_eq!(config.index.on_dimension_mismatch, DimensionPolicy::Reject);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = parse("[chunking]\nchunk_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_rejects_unknown_backend_and_provider() {
        assert!(parse("[index]\nbackend = \"faiss\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"local\"\n").is_err());
        assert!(parse("[generation]\nprovider = \"openai\"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_upsert_batch_size() {
        let err = parse("[index]\nupsert_batch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("upsert_batch_size"));
    }

    #[test]
    fn test_disabled_embedding_skips_dims_check() {
        let config = parse("[embedding]\nprovider = \"disabled\"\ndims = 0\n").unwrap();
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let example = parse(include_str!("../config/kb.example.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(example.chunking.params(), defaults.chunking.params());
        assert_eq!(example.retrieval.top_k, defaults.retrieval.top_k);
        assert_eq!(example.embedding.model, defaults.embedding.model);
        assert_eq!(example.generation.model, defaults.generation.model);
        assert_eq!(example.index.url, defaults.index.url);
        assert_eq!(example.index.upsert_batch_size, defaults.index.upsert_batch_size);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_or_default(&missing).is_err());
    }
}
