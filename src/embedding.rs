//! Embedding providers.
//!
//! Implements the core [`Embedder`] contract over several backends:
//!
//! - **[`DisabledEmbedder`]**: always errors; ingestion and search refuse to run.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with retry/backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance (`/api/embed`).
//! - **[`LocalEmbedder`]**: runs a fastembed model in-process (feature `local-embeddings`).
//!
//! Passage batches are split by `embedding.batch_size`. The optional
//! `embedding.query_prefix` is prepended to query text only, which is what
//! instruction-tuned retrieval models expect.
//!
//! Retry behavior for the remote providers lives in [`crate::http::post_json`].
//! `embedding.max_retries` applies to passage batches only; query embeddings
//! get a single attempt.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use docroute_core::embedding::Embedder;

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

fn with_prefix(prefix: &Option<String>, text: &str) -> String {
    match prefix {
        Some(p) => format!("{}{}", p, text),
        None => text.to_string(),
    }
}

fn check_dims(vectors: &[Vec<f32>], dims: usize, provider: &str) -> Result<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "{} returned a {}-dimensional vector, expected {}",
            provider,
            bad.len(),
            dims
        );
    }
    Ok(())
}

// ============ Disabled ============

/// Placeholder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_passages(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ OpenAI ============

/// OpenAI embeddings API client. Reads the key from `OPENAI_API_KEY` on each call.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    query_prefix: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: http::join(base, "v1/embeddings"),
            model: config
                .model
                .clone()
                .ok_or_else(|| anyhow!("embedding.model required"))?,
            dims: config.dims.ok_or_else(|| anyhow!("embedding.dims required"))?,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            query_prefix: config.query_prefix.clone(),
        })
    }

    async fn embed_batch(&self, texts: &[String], max_retries: u32) -> Result<Vec<Vec<f32>>> {
        let api_key = http::api_key("OPENAI_API_KEY")?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            Some(&api_key),
            &body,
            max_retries,
            "OpenAI API",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "OpenAI API returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        check_dims(&vectors, self.dims, "OpenAI API")?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_batch(batch, self.max_retries).await?);
        }
        Ok(out)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = vec![with_prefix(&self.query_prefix, text)];
        self.embed_batch(&input, http::NO_RETRIES)
            .await?
            .pop()
            .ok_or_else(|| anyhow!("OpenAI API returned no embedding"))
    }
}

/// Parse `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing 'data' array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing 'embedding' array"))?;
        indexed.push((index, float_array(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn float_array(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama ============

/// Ollama `/api/embed` client. No API key; the default base URL is
/// `http://localhost:11434`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    query_prefix: Option<String>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: http::join(base, "api/embed"),
            model: config
                .model
                .clone()
                .ok_or_else(|| anyhow!("embedding.model required"))?,
            dims: config.dims.ok_or_else(|| anyhow!("embedding.dims required"))?,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            query_prefix: config.query_prefix.clone(),
        })
    }

    async fn embed_batch(&self, texts: &[String], max_retries: u32) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            None,
            &body,
            max_retries,
            "Ollama API",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "Ollama API returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        check_dims(&vectors, self.dims, "Ollama API")?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_batch(batch, self.max_retries).await?);
        }
        Ok(out)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = vec![with_prefix(&self.query_prefix, text)];
        self.embed_batch(&input, http::NO_RETRIES)
            .await?
            .pop()
            .ok_or_else(|| anyhow!("Ollama API returned no embedding"))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing 'embeddings' array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.as_array()
                .map(|values| float_array(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Resolve a local model name to its fastembed identifier and vector size.
#[cfg(feature = "local-embeddings")]
fn resolve_local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ),
    }
}

/// In-process fastembed model. The ONNX session is created on first use
/// and reused afterwards; inference runs on the blocking pool.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    query_prefix: Option<String>,
    session: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-small-en-v1.5".to_string());
        let (model, native_dims) = resolve_local_model(&model_name)?;
        if let Some(dims) = config.dims {
            if dims != native_dims {
                bail!(
                    "embedding.dims = {} does not match {} ({} dimensions)",
                    dims,
                    model_name,
                    native_dims
                );
            }
        }
        Ok(Self {
            model_name,
            model,
            dims: native_dims,
            batch_size: config.batch_size,
            query_prefix: config.query_prefix.clone(),
            session: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let session = self.session.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(loaded);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local embedding model not loaded"))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec()).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.run(vec![with_prefix(&self.query_prefix, text)])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("Local embedding returned no vector"))
    }
}

/// Create the [`Embedder`] named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | [`LocalEmbedder`] (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.4, 0.5]},
                {"index": 0, "embedding": [0.1, 0.2]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let json = serde_json::json!({"error": "bad"});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_ollama_response_rejects_scalar() {
        let json = serde_json::json!({"embeddings": [3.0]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_query_prefix_applies_only_when_set() {
        assert_eq!(
            with_prefix(&Some("query: ".into()), "revenue"),
            "query: revenue"
        );
        assert_eq!(with_prefix(&None, "revenue"), "revenue");
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[vec![0.0; 3]], 3, "x").is_ok());
        assert!(check_dims(&[vec![0.0; 3], vec![0.0; 2]], 3, "x").is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(embedder.embed_query("q").await.is_err());
        assert!(embedder.embed_passages(&["p".into()]).await.is_err());
    }

    #[test]
    fn test_remote_embedder_urls() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        let ollama = OllamaEmbedder::new(&config).unwrap();
        assert_eq!(ollama.url, "http://localhost:11434/api/embed");

        let config = EmbeddingConfig {
            provider: "openai".into(),
            url: Some("http://proxy:9000/".into()),
            ..config
        };
        let openai = OpenAiEmbedder::new(&config).unwrap();
        assert_eq!(openai.url, "http://proxy:9000/v1/embeddings");
        assert_eq!(openai.dims(), 768);
    }

    #[tokio::test]
    async fn test_query_embedding_makes_one_attempt() {
        let (base, hits) = crate::testing::unavailable_endpoint().await;
        let embedder = OllamaEmbedder::new(&EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(4),
            url: Some(base),
            max_retries: 3,
            ..EmbeddingConfig::default()
        })
        .unwrap();

        assert!(embedder.embed_query("revenue").await.is_err());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_passage_embedding_retries() {
        let (base, hits) = crate::testing::unavailable_endpoint().await;
        let embedder = OllamaEmbedder::new(&EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(4),
            url: Some(base),
            max_retries: 1,
            ..EmbeddingConfig::default()
        })
        .unwrap();

        let err = embedder.embed_passages(&["a".into()]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[cfg(feature = "local-embeddings")]
    #[test]
    fn test_local_dims_mismatch_rejected() {
        let config = EmbeddingConfig {
            provider: "local".into(),
            model: Some("bge-small-en-v1.5".into()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(LocalEmbedder::new(&config).is_err());
    }
}
