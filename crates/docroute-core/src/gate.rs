//! Relevance gate: is the retrieved evidence good enough to answer from?
//!
//! The primary signal is the best rerank score of a two-stage search,
//! compared inclusively against a threshold. Only when that passes is the
//! [`AnswerabilityOracle`] asked to confirm that the top excerpts actually
//! answer the question. A failing oracle counts as a yes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::RetrievalCandidate;
use crate::retrieval::{RetrievalEngine, DEFAULT_MAX_RESULTS};
use crate::router::GateOutcome;

/// Default inclusive rerank threshold. Raw cross-encoder logits are model
/// specific, so this must be re-tuned when the reranker model changes.
pub const DEFAULT_RERANK_THRESHOLD: f32 = -3.5;
/// Default number of top excerpts shown to the oracle.
pub const DEFAULT_ORACLE_EXCERPTS: usize = 4;

/// Judges whether excerpts can answer a question.
///
/// Implementations should bound their own latency; the gate treats any
/// error, including a timeout, as `true`.
#[async_trait]
pub trait AnswerabilityOracle: Send + Sync {
    async fn can_answer(&self, query: &str, excerpts: &[String]) -> Result<bool>;
}

/// Outcome of [`RelevanceGate::evaluate`].
#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub should_use_documents: bool,
    pub best_rerank_score: Option<f32>,
    pub candidates: Vec<RetrievalCandidate>,
    pub primary_passed: bool,
    /// `None` when the oracle was not consulted.
    pub oracle_verdict: Option<bool>,
}

impl GateResult {
    pub fn outcome(&self) -> GateOutcome {
        GateOutcome::Relevance {
            primary_passed: self.primary_passed,
            oracle_confirmed: self.oracle_verdict.unwrap_or(false),
        }
    }
}

pub struct RelevanceGate {
    engine: Arc<RetrievalEngine>,
    oracle: Arc<dyn AnswerabilityOracle>,
    max_results: usize,
    oracle_excerpts: usize,
}

impl RelevanceGate {
    pub fn new(engine: Arc<RetrievalEngine>, oracle: Arc<dyn AnswerabilityOracle>) -> Self {
        Self {
            engine,
            oracle,
            max_results: DEFAULT_MAX_RESULTS,
            oracle_excerpts: DEFAULT_ORACLE_EXCERPTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_oracle_excerpts(mut self, oracle_excerpts: usize) -> Self {
        self.oracle_excerpts = oracle_excerpts;
        self
    }

    pub async fn evaluate(&self, query: &str, session_id: &str, threshold: f32) -> GateResult {
        let candidates = self.engine.search(query, session_id, self.max_results).await;
        let best_rerank_score = candidates.first().and_then(|c| c.rerank_score);
        let primary_passed = best_rerank_score.is_some_and(|s| s >= threshold);

        if !primary_passed {
            tracing::info!(
                session_id,
                candidates = candidates.len(),
                best_score = best_rerank_score,
                threshold,
                "relevance gate: below threshold"
            );
            return GateResult {
                should_use_documents: false,
                best_rerank_score,
                candidates,
                primary_passed,
                oracle_verdict: None,
            };
        }

        let excerpts: Vec<String> = candidates
            .iter()
            .take(self.oracle_excerpts)
            .map(|c| c.content.clone())
            .collect();
        let verdict = match self.oracle.can_answer(query, &excerpts).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "answerability oracle failed; assuming answerable");
                true
            }
        };

        tracing::info!(
            session_id,
            candidates = candidates.len(),
            best_score = best_rerank_score,
            oracle = verdict,
            "relevance gate: evaluated"
        );
        GateResult {
            should_use_documents: verdict,
            best_rerank_score,
            candidates,
            primary_passed,
            oracle_verdict: Some(verdict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorIndex;
    use crate::testing::{seed, FixedEmbedder, FixedOracle, ScriptedReranker};
    use std::sync::atomic::Ordering;

    async fn gate_with(best: f32, oracle: Arc<FixedOracle>) -> RelevanceGate {
        let index = Arc::new(InMemoryVectorIndex::new());
        seed(&index, "s", "doc", &["a", "b", "c", "d", "e", "f"]).await;
        let reranker = ScriptedReranker::new()
            .with("a", best)
            .with("b", best - 1.0)
            .with("c", best - 2.0)
            .with("d", best - 3.0)
            .with("e", best - 4.0)
            .with("f", best - 5.0);
        let engine = RetrievalEngine::new(
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            index,
            Arc::new(reranker),
            20,
        );
        RelevanceGate::new(Arc::new(engine), oracle)
    }

    #[tokio::test]
    async fn test_threshold_boundary_inclusive() {
        let oracle = Arc::new(FixedOracle::new(Some(true)));
        let gate = gate_with(-3.5, oracle.clone()).await;
        let result = gate.evaluate("q", "s", -3.5).await;
        assert!(result.primary_passed);
        assert!(result.should_use_documents);
        assert_eq!(result.best_rerank_score, Some(-3.5));
    }

    #[tokio::test]
    async fn test_below_threshold_skips_oracle() {
        let oracle = Arc::new(FixedOracle::new(Some(true)));
        let gate = gate_with(-4.0, oracle.clone()).await;
        let result = gate.evaluate("q", "s", DEFAULT_RERANK_THRESHOLD).await;
        assert!(!result.should_use_documents);
        assert!(!result.primary_passed);
        assert_eq!(result.oracle_verdict, None);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oracle_veto() {
        let oracle = Arc::new(FixedOracle::new(Some(false)));
        let gate = gate_with(-1.0, oracle.clone()).await;
        let result = gate.evaluate("q", "s", DEFAULT_RERANK_THRESHOLD).await;
        assert!(result.primary_passed);
        assert!(!result.should_use_documents);
        assert_eq!(result.oracle_verdict, Some(false));
    }

    #[tokio::test]
    async fn test_oracle_failure_is_optimistic() {
        let oracle = Arc::new(FixedOracle::new(None));
        let gate = gate_with(-1.0, oracle.clone()).await;
        let result = gate.evaluate("q", "s", DEFAULT_RERANK_THRESHOLD).await;
        assert!(result.should_use_documents);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oracle_sees_at_most_four_excerpts() {
        let oracle = Arc::new(FixedOracle::new(Some(true)));
        let gate = gate_with(0.0, oracle.clone()).await;
        let result = gate.evaluate("q", "s", DEFAULT_RERANK_THRESHOLD).await;
        assert_eq!(result.candidates.len(), 5);
        assert_eq!(*oracle.excerpts_seen.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_no_candidates_means_no_documents() {
        let oracle = Arc::new(FixedOracle::new(Some(true)));
        let gate = gate_with(5.0, oracle.clone()).await;
        let result = gate.evaluate("q", "empty-session", DEFAULT_RERANK_THRESHOLD).await;
        assert!(!result.should_use_documents);
        assert!(result.candidates.is_empty());
        assert_eq!(result.best_rerank_score, None);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }
}
