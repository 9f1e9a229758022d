//! Cross-encoder rerankers.
//!
//! - **[`DisabledReranker`]**: always errors, so searches degrade to empty results.
//! - **[`HttpReranker`]**: `POST {url}/rerank` with `{query, texts}`, expecting
//!   `[{index, score}]` back (the text-embeddings-inference shape).
//! - **[`LocalReranker`]**: fastembed `TextRerank` in-process (feature `local-embeddings`).
//!
//! All of them return raw scores in input order. Reranking runs on the query
//! path, so the HTTP reranker makes a single attempt.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use docroute_core::rerank::Reranker;

use crate::config::RerankerConfig;
use crate::http;

pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
        bail!("Reranker is disabled. Set [reranker] provider in config.")
    }
}

pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("reranker.url required for http provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: http::join(base, "rerank"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    score: f32,
}

/// Scatter `[{index, score}]` back into input order. Every input must be scored.
fn scores_in_order(items: Vec<RerankItem>, len: usize) -> Result<Vec<f32>> {
    let mut scores = vec![None; len];
    for item in items {
        let slot = scores
            .get_mut(item.index)
            .ok_or_else(|| anyhow!("Reranker returned out-of-range index {}", item.index))?;
        *slot = Some(item.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow!("Reranker returned no score for input {}", i)))
        .collect()
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "query": query,
            "texts": texts,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            None,
            &body,
            http::NO_RETRIES,
            "Rerank API",
        )
        .await?;
        let items: Vec<RerankItem> = serde_json::from_value(json)
            .map_err(|e| anyhow!("Invalid rerank response: {}", e))?;
        scores_in_order(items, texts.len())
    }
}

#[cfg(feature = "local-embeddings")]
fn resolve_rerank_model(name: &str) -> Result<fastembed::RerankerModel> {
    use fastembed::RerankerModel;
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        "jina-reranker-v2-base-multilingual" => Ok(RerankerModel::JINARerankerV2BaseMultiligual),
        other => bail!(
            "Unknown local reranker model: '{}'. Supported models: bge-reranker-base, \
             bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            other
        ),
    }
}

/// In-process cross-encoder. Loaded lazily on the blocking pool.
#[cfg(feature = "local-embeddings")]
pub struct LocalReranker {
    model: fastembed::RerankerModel,
    session: Arc<std::sync::Mutex<Option<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let name = config.model.as_deref().unwrap_or("bge-reranker-base");
        Ok(Self {
            model: resolve_rerank_model(name)?,
            session: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Reranker for LocalReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session.clone();
        let model = self.model.clone();
        let query = query.to_string();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("local reranker lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow!("Failed to initialize local reranker: {}", e))?;
                *guard = Some(loaded);
            }
            let reranker = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local reranker not loaded"))?;

            let documents: Vec<&str> = texts.iter().map(String::as_str).collect();
            let results = reranker
                .rerank(query.as_str(), documents, false, None)
                .map_err(|e| anyhow!("Local rerank failed: {}", e))?;
            let items = results
                .into_iter()
                .map(|r| RerankItem {
                    index: r.index,
                    score: r.score,
                })
                .collect();
            scores_in_order(items, texts.len())
        })
        .await?
    }
}

pub fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReranker)),
        "http" => Ok(Arc::new(HttpReranker::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalReranker::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local reranker requires --features local-embeddings"),
        other => bail!("Unknown reranker provider: {}", other),
    }
}
