//! Two-stage retrieval: dense recall followed by cross-encoder precision.
//!
//! [`RetrievalEngine::search`] embeds the query, pulls
//! `min(top_k, 4 × max_results)` nearest chunks of the session from the
//! [`VectorIndex`], rescores every one of them with the [`Reranker`], and
//! keeps the best `max_results` by rerank score. Ties keep their dense
//! order.
//!
//! [`RetrievalEngine::preview`] skips both stages and returns the first
//! chunks of the session in reading order, for queries where similarity
//! ranking is meaningless ("summarize this document").
//!
//! Neither path returns an error. Any collaborator failure is logged and
//! yields an empty result, which callers treat as "no usable evidence".

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::embedding::Embedder;
use crate::models::RetrievalCandidate;
use crate::rerank::Reranker;
use crate::store::VectorIndex;

/// Default stage-1 ceiling (`RETRIEVAL_TOP_K`).
pub const DEFAULT_TOP_K: usize = 20;
/// Default number of results kept after reranking.
pub const DEFAULT_MAX_RESULTS: usize = 5;
/// Stage-1 over-fetch factor relative to `max_results`.
const RECALL_FACTOR: usize = 4;

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Arc<dyn Reranker>,
    top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Arc<dyn Reranker>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            top_k,
        }
    }

    /// Number of stage-1 candidates fetched for a given `max_results`.
    pub fn recall_limit(&self, max_results: usize) -> usize {
        self.top_k.min(RECALL_FACTOR * max_results)
    }

    /// Two-stage search restricted to `session_id`.
    ///
    /// The returned candidates all carry a `rerank_score`, in non-increasing
    /// order. Empty on any failure.
    pub async fn search(
        &self,
        query: &str,
        session_id: &str,
        max_results: usize,
    ) -> Vec<RetrievalCandidate> {
        match self.try_search(query, session_id, max_results).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "retrieval failed; returning no candidates");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query: &str,
        session_id: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let limit = self.recall_limit(max_results);
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Stage 1: dense recall
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .context("embedding query")?;
        let hits = self
            .index
            .query(&vector, session_id, limit)
            .await
            .context("querying vector index")?;
        if hits.is_empty() {
            tracing::debug!(session_id, "no stage-1 candidates");
            return Ok(Vec::new());
        }

        // Stage 2: cross-encoder precision
        let texts: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
        let scores = self
            .reranker
            .score(query, &texts)
            .await
            .context("reranking candidates")?;
        if scores.len() != hits.len() {
            bail!(
                "reranker returned {} scores for {} candidates",
                scores.len(),
                hits.len()
            );
        }

        let recalled = hits.len();
        let mut candidates: Vec<(f32, RetrievalCandidate)> = hits
            .into_iter()
            .zip(scores)
            .map(|(hit, score)| {
                let score = if score.is_nan() { f32::NEG_INFINITY } else { score };
                let candidate = RetrievalCandidate {
                    content: hit.content,
                    metadata: hit.metadata,
                    similarity_score: 1.0 - hit.distance,
                    rerank_score: Some(score),
                };
                (score, candidate)
            })
            .collect();

        // sort_by is stable: equal scores keep their dense order.
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(max_results);

        tracing::debug!(
            session_id,
            recalled,
            kept = candidates.len(),
            best_score = candidates.first().map(|c| c.0),
            "two-stage search complete"
        );
        Ok(candidates.into_iter().map(|(_, c)| c).collect())
    }

    /// The first `max_chunks` chunks of the session in reading order.
    ///
    /// Candidates carry `similarity_score = 1.0` and no rerank score.
    /// Empty on any failure.
    pub async fn preview(&self, session_id: &str, max_chunks: usize) -> Vec<RetrievalCandidate> {
        let entries = match self.index.get_all(session_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "preview read failed");
                return Vec::new();
            }
        };

        let mut entries = entries;
        entries.sort_by(|a, b| {
            a.metadata
                .chunk_index
                .cmp(&b.metadata.chunk_index)
                .then_with(|| a.metadata.document_id.cmp(&b.metadata.document_id))
        });
        entries.truncate(max_chunks);

        entries
            .into_iter()
            .map(|e| RetrievalCandidate {
                content: e.content,
                metadata: e.metadata,
                similarity_score: 1.0,
                rerank_score: None,
            })
            .collect()
    }
}
