use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use docvault_core::pipeline::PolicyFilteringMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Demo mode: every request is the demo admin. Never enable outside
    /// local development.
    #[serde(default)]
    pub disabled: bool,
    /// Fallback JWT secret; the DOCVAULT_JWT_SECRET env var takes
    /// precedence.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_token_exp_minutes")]
    pub token_exp_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            secret: None,
            token_exp_minutes: default_token_exp_minutes(),
        }
    }
}

fn default_token_exp_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    docvault_core::chunk::DEFAULT_CHUNK_SIZE
}

fn default_overlap() -> usize {
    docvault_core::chunk::DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"` (deterministic, local) or `"openai"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
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
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_dims() -> usize {
    384
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

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum candidate count fetched per query regardless of `top_k`.
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: usize,
    /// `"post_retrieval"` or `"in_retrieval"`.
    #[serde(default = "default_filtering_mode")]
    pub filtering_mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_floor: default_candidate_floor(),
            filtering_mode: default_filtering_mode(),
        }
    }
}

fn default_candidate_floor() -> usize {
    docvault_core::pipeline::DEFAULT_CANDIDATE_FLOOR
}

fn default_filtering_mode() -> String {
    "post_retrieval".to_string()
}

impl RetrievalConfig {
    pub fn mode(&self) -> Result<PolicyFilteringMode> {
        PolicyFilteringMode::from_str(&self.filtering_mode)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directory of structured `*.txt` files served by the demo ingest
    /// endpoint.
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            corpus_dir: default_corpus_dir(),
        }
    }
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./demo_corpus")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    if config.retrieval.candidate_floor == 0 {
        anyhow::bail!("retrieval.candidate_floor must be >= 1");
    }
    config
        .retrieval
        .mode()
        .with_context(|| "Invalid retrieval.filtering_mode")?;

    if config.synthesis.enabled {
        if config.synthesis.base_url.is_none() {
            anyhow::bail!("synthesis.base_url must be specified when synthesis is enabled");
        }
        if config.synthesis.model.is_none() {
            anyhow::bail!("synthesis.model must be specified when synthesis is enabled");
        }
    }

    Ok(config)
}
