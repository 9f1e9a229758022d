//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! [`load_config`] parses and validates in one step; callers never see an
//! unvalidated [`Config`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docroute_core::chunk::ChunkingParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// `"approx"` or a path to a HuggingFace `tokenizer.json`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            min_chunk_tokens: default_min_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            tokenizer: default_tokenizer(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            max_chunk_tokens: self.max_chunk_tokens,
            min_chunk_tokens: self.min_chunk_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

fn default_max_chunk_tokens() -> usize {
    1000
}
fn default_min_chunk_tokens() -> usize {
    150
}
fn default_overlap_tokens() -> usize {
    200
}
fn default_tokenizer() -> String {
    "approx".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Stage-1 ceiling (`RETRIEVAL_TOP_K`).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_preview_chunks")]
    pub preview_chunks: usize,
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: f32,
    #[serde(default = "default_oracle_excerpts")]
    pub oracle_excerpts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_results: default_max_results(),
            preview_chunks: default_preview_chunks(),
            rerank_threshold: default_rerank_threshold(),
            oracle_excerpts: default_oracle_excerpts(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_max_results() -> usize {
    5
}
fn default_preview_chunks() -> usize {
    6
}
fn default_rerank_threshold() -> f32 {
    -3.5
}
fn default_oracle_excerpts() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama default: `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Instruction prepended to query-side embeddings only.
    #[serde(default)]
    pub query_prefix: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            query_prefix: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
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
pub struct RerankerConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions base URL. Unset disables the
    /// model-backed classifier and oracle.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            timeout_secs: default_timeout_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_oracle_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_web_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_excluded_domains")]
    pub excluded_domains: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            api_key_env: default_web_key_env(),
            timeout_secs: default_timeout_secs(),
            excluded_domains: default_excluded_domains(),
        }
    }
}

fn default_web_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}
fn default_excluded_domains() -> Vec<String> {
    ["youtube.com", "tiktok.com", "instagram.com", "reddit.com"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// `"sqlite"` (same database as the index) or `"file"` (JSON).
    #[serde(default = "default_registry_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            path: None,
        }
    }
}

fn default_registry_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
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
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    let chunking = &config.chunking;
    if chunking.max_chunk_tokens == 0 {
        bail!("chunking.max_chunk_tokens must be > 0");
    }
    if chunking.min_chunk_tokens > chunking.max_chunk_tokens {
        bail!("chunking.min_chunk_tokens must be <= chunking.max_chunk_tokens");
    }
    if chunking.overlap_tokens >= chunking.max_chunk_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_chunk_tokens");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_results == 0 {
        bail!("retrieval.max_results must be >= 1");
    }
    if !config.retrieval.rerank_threshold.is_finite() {
        bail!("retrieval.rerank_threshold must be a finite number");
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if embedding.is_enabled() && embedding.provider != "local" {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is '{}'", embedding.provider);
        }
        if embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is '{}'", embedding.provider);
        }
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    match config.reranker.provider.as_str() {
        "disabled" | "local" => {}
        "http" => {
            if config.reranker.url.is_none() {
                bail!("reranker.url must be set when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown reranker provider: '{}'. Must be disabled, local, or http.",
            other
        ),
    }

    match config.web.provider.as_str() {
        "disabled" | "tavily" => {}
        other => bail!("Unknown web provider: '{}'. Must be disabled or tavily.", other),
    }

    match config.registry.backend.as_str() {
        "sqlite" => {}
        "file" => {
            if config.registry.path.is_none() {
                bail!("registry.path must be set when backend is 'file'");
            }
        }
        other => bail!("Unknown registry backend: '{}'. Must be sqlite or file.", other),
    }

    Ok(config)
}
