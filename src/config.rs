use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub files: Option<FilesConfig>,
}

/// Vector index location. Credentials come from the environment
/// (`PINECONE_API_KEY`), never from the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"pinecone"` or `"memory"` (memory keeps nothing between runs and
    /// exists for tests and dry experiments).
    #[serde(default = "default_index_provider")]
    pub provider: String,
    /// Index host URL, e.g. `https://githelp-abc123.svc.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    /// Index namespace; empty string means the default namespace.
    #[serde(default)]
    pub namespace: String,
    /// Upsert batch size. Bounds payload size and isolates partial failures.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_index_provider() -> String {
    "pinecone".to_string()
}
fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk. Must stay within the embedding model's
    /// input limit.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters shared between adjacent chunks.
    #[serde(default)]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: 0,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Drop retrieved chunks scoring below this floor. `None` keeps
    /// everything the index returns.
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector dimensionality. Ingestion and query embeddings must
    /// agree; a mismatch is a configuration error, not a retry.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Texts per embedding API call.
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
    /// Concurrent embedding calls per ingestion run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_embed_batch(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_embed_batch() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard deadline for one question-ask. On expiry the caller gets a
    /// timeout error, never a partial answer.
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_completion_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Lease lifetime. A crashed run's lease expires after this long so the
    /// project cannot stay wedged.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

fn default_lease_ttl() -> u64 {
    900
}

/// Which files the CLI feeds into ingestion.
#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.rs".to_string(),
        "**/*.ts".to_string(),
        "**/*.tsx".to_string(),
        "**/*.py".to_string(),
        "**/*.md".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.index.provider.as_str() {
        "pinecone" | "memory" => {}
        other => anyhow::bail!(
            "Unknown index provider: '{}'. Must be pinecone or memory.",
            other
        ),
    }

    if config.index.provider == "pinecone" && config.index.host.is_none() {
        anyhow::bail!("index.host is required when provider is 'pinecone'");
    }

    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be > 0");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.embedding.max_concurrency == 0 {
        anyhow::bail!("embedding.max_concurrency must be >= 1");
    }

    Ok(())
}
