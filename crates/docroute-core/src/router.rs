//! Evidence routing.
//!
//! [`route`] is the single decision table that turns document presence,
//! query intent, the relevance-gate outcome, and query multiplicity into a
//! [`RoutingDecision`]. It is pure and total: every input combination maps
//! to exactly one decision, and malformed intents are coerced to `doc_qa`.
//!
//! [`DocumentRouter`] drives the collaborators in the order the table
//! needs them: classify, then preview (summaries) or gate (questions), then
//! route. Retrieval is never touched for sessions without documents or for
//! `general_web` queries.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::gate::{GateResult, RelevanceGate, DEFAULT_RERANK_THRESHOLD};
use crate::intent::{fallback_analysis, IntentClassifier};
use crate::models::{EvidenceSource, QueryAnalysis, QueryIntent, RetrievalCandidate, RoutingDecision};
use crate::retrieval::RetrievalEngine;

/// Default number of chunks read for summary previews.
pub const DEFAULT_PREVIEW_CHUNKS: usize = 6;

/// What the document side produced for this query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Neither preview nor gate was consulted.
    Skipped,
    /// A summary preview was read.
    Preview { non_empty: bool },
    /// The relevance gate ran. `oracle_confirmed` is meaningful only when
    /// `primary_passed`.
    Relevance {
        primary_passed: bool,
        oracle_confirmed: bool,
    },
}

/// True when the query asks several things at once: more than one suggested
/// sub-search, the conjunction " and ", or a `?` before the final character.
pub fn is_multi_part(query: &str, suggested_searches: &[String]) -> bool {
    if suggested_searches.len() > 1 {
        return true;
    }
    if query.to_lowercase().contains(" and ") {
        return true;
    }
    let mut chars = query.chars();
    chars.next_back();
    chars.as_str().contains('?')
}

/// The routing decision table. First matching row wins.
pub fn route(
    session_has_docs: bool,
    query_intent: Option<&str>,
    is_multi_part: bool,
    gate: GateOutcome,
) -> RoutingDecision {
    if !session_has_docs {
        return RoutingDecision::plain(EvidenceSource::Web);
    }

    match QueryIntent::coerce(query_intent) {
        QueryIntent::DocSummary => match gate {
            GateOutcome::Preview { non_empty: true } => RoutingDecision::plain(EvidenceSource::Documents),
            _ => RoutingDecision {
                source: EvidenceSource::Web,
                rag_fallback_used: true,
                doc_not_in_doc: false,
            },
        },
        QueryIntent::GeneralWeb => RoutingDecision::plain(EvidenceSource::Web),
        QueryIntent::DocQa => match gate {
            GateOutcome::Relevance {
                primary_passed: true,
                oracle_confirmed: true,
            } => {
                if is_multi_part {
                    RoutingDecision::plain(EvidenceSource::Hybrid)
                } else {
                    RoutingDecision::plain(EvidenceSource::Documents)
                }
            }
            _ => RoutingDecision {
                source: EvidenceSource::NotInDoc,
                rag_fallback_used: false,
                doc_not_in_doc: true,
            },
        },
    }
}

/// Result of [`DocumentRouter::decide`].
#[derive(Debug, Clone, Serialize)]
pub struct RoutedQuery {
    pub analysis: QueryAnalysis,
    pub decision: RoutingDecision,
    pub outcome: GateOutcome,
    /// Document evidence for the generation step; empty unless the
    /// decision uses documents.
    pub documents: Vec<RetrievalCandidate>,
    /// Present when the relevance gate ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateResult>,
}

pub struct DocumentRouter {
    classifier: Arc<dyn IntentClassifier>,
    engine: Arc<RetrievalEngine>,
    gate: RelevanceGate,
    threshold: f32,
    preview_chunks: usize,
}

impl DocumentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, engine: Arc<RetrievalEngine>, gate: RelevanceGate) -> Self {
        Self {
            classifier,
            engine,
            gate,
            threshold: DEFAULT_RERANK_THRESHOLD,
            preview_chunks: DEFAULT_PREVIEW_CHUNKS,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_preview_chunks(mut self, preview_chunks: usize) -> Self {
        self.preview_chunks = preview_chunks;
        self
    }

    pub async fn decide(&self, query: &str, session_id: &str, session_has_docs: bool) -> RoutedQuery {
        let mut analysis = match self.classifier.classify(query, session_has_docs).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "intent classification failed; using heuristic analysis");
                fallback_analysis(query, Utc::now())
            }
        };
        if !session_has_docs {
            analysis.query_intent = None;
        }

        let multi_part = is_multi_part(query, &analysis.suggested_searches);
        let intent = QueryIntent::coerce(analysis.query_intent.as_deref());

        let mut documents = Vec::new();
        let mut gate_result = None;
        let outcome = if !session_has_docs {
            GateOutcome::Skipped
        } else {
            match intent {
                QueryIntent::GeneralWeb => GateOutcome::Skipped,
                QueryIntent::DocSummary => {
                    documents = self.engine.preview(session_id, self.preview_chunks).await;
                    GateOutcome::Preview {
                        non_empty: !documents.is_empty(),
                    }
                }
                QueryIntent::DocQa => {
                    let result = self.gate.evaluate(query, session_id, self.threshold).await;
                    let outcome = result.outcome();
                    documents = result.candidates.clone();
                    gate_result = Some(result);
                    outcome
                }
            }
        };

        let decision = route(
            session_has_docs,
            analysis.query_intent.as_deref(),
            multi_part,
            outcome,
        );
        if !decision.source.uses_documents() {
            documents.clear();
        }

        tracing::info!(
            session_id,
            intent = intent.as_str(),
            multi_part,
            source = decision.source.as_str(),
            documents = documents.len(),
            "routed query"
        );

        RoutedQuery {
            analysis,
            decision,
            outcome,
            documents,
            gate: gate_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceSource::*;
    use crate::store::memory::InMemoryVectorIndex;
    use crate::testing::{seed, CountingIndex, FixedEmbedder, FixedOracle, ScriptedReranker};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    const PASS: GateOutcome = GateOutcome::Relevance {
        primary_passed: true,
        oracle_confirmed: true,
    };
    const ORACLE_NO: GateOutcome = GateOutcome::Relevance {
        primary_passed: true,
        oracle_confirmed: false,
    };
    const BELOW: GateOutcome = GateOutcome::Relevance {
        primary_passed: false,
        oracle_confirmed: false,
    };

    fn d(source: EvidenceSource, rag_fallback_used: bool, doc_not_in_doc: bool) -> RoutingDecision {
        RoutingDecision {
            source,
            rag_fallback_used,
            doc_not_in_doc,
        }
    }

    #[test]
    fn test_no_documents_always_web() {
        let intents = [None, Some("doc_summary"), Some("doc_qa"), Some("general_web"), Some("junk")];
        let outcomes = [
            GateOutcome::Skipped,
            GateOutcome::Preview { non_empty: true },
            PASS,
            ORACLE_NO,
            BELOW,
        ];
        for intent in intents {
            for outcome in outcomes {
                for multi in [false, true] {
                    assert_eq!(route(false, intent, multi, outcome), d(Web, false, false));
                }
            }
        }
    }

    #[test]
    fn test_decision_table_rows() {
        let summary = Some("doc_summary");
        assert_eq!(route(true, summary, false, GateOutcome::Preview { non_empty: true }), d(Documents, false, false));
        assert_eq!(route(true, summary, true, GateOutcome::Preview { non_empty: true }), d(Documents, false, false));
        assert_eq!(route(true, summary, false, GateOutcome::Preview { non_empty: false }), d(Web, true, false));
        assert_eq!(route(true, summary, true, GateOutcome::Skipped), d(Web, true, false));

        for multi in [false, true] {
            for outcome in [GateOutcome::Skipped, PASS, BELOW] {
                assert_eq!(route(true, Some("general_web"), multi, outcome), d(Web, false, false));
            }
        }

        for intent in [Some("doc_qa"), None] {
            for multi in [false, true] {
                assert_eq!(route(true, intent, multi, BELOW), d(NotInDoc, false, true));
                assert_eq!(route(true, intent, multi, ORACLE_NO), d(NotInDoc, false, true));
                assert_eq!(route(true, intent, multi, GateOutcome::Skipped), d(NotInDoc, false, true));
            }
            assert_eq!(route(true, intent, true, PASS), d(Hybrid, false, false));
            assert_eq!(route(true, intent, false, PASS), d(Documents, false, false));
        }
    }

    #[test]
    fn test_unknown_intent_is_doc_qa() {
        for raw in ["", "  ", "DOC_QA", "summarize", "web"] {
            assert_eq!(route(true, Some(raw), false, PASS), d(Documents, false, false));
            assert_eq!(route(true, Some(raw), false, BELOW), d(NotInDoc, false, true));
        }
    }

    #[test]
    fn test_summary_never_hybrid() {
        for multi in [false, true] {
            for outcome in [GateOutcome::Preview { non_empty: true }, PASS] {
                assert_ne!(route(true, Some("doc_summary"), multi, outcome).source, Hybrid);
            }
        }
    }

    #[test]
    fn test_route_is_deterministic() {
        let a = route(true, Some("doc_qa"), true, PASS);
        let b = route(true, Some("doc_qa"), true, PASS);
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_multi_part() {
        let one = vec!["x".to_string()];
        let three = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(is_multi_part("simple", &three));
        assert!(!is_multi_part("what is rust?", &one));
        assert!(is_multi_part("compare rust AND go", &one));
        assert!(is_multi_part("who? and why", &[]));
        assert!(is_multi_part("who? when?", &one));
        assert!(!is_multi_part("brandy", &[]));
        assert!(!is_multi_part("", &[]));
    }

    struct StubClassifier {
        intent: Option<&'static str>,
        searches: usize,
        fail: bool,
    }

    #[async_trait]
    impl IntentClassifier for StubClassifier {
        async fn classify(&self, query: &str, has_documents: bool) -> Result<QueryAnalysis> {
            if self.fail {
                bail!("model unavailable");
            }
            Ok(QueryAnalysis {
                query_type: "factual".into(),
                search_intent: query.into(),
                key_entities: vec![],
                suggested_searches: (0..self.searches).map(|i| format!("{} {}", query, i)).collect(),
                complexity_score: 3,
                requires_real_time: false,
                query_intent: if has_documents { self.intent.map(String::from) } else { None },
            })
        }
    }

    struct Fixture {
        router: DocumentRouter,
        index: Arc<CountingIndex>,
        embedder: Arc<FixedEmbedder>,
        oracle: Arc<FixedOracle>,
    }

    async fn fixture(
        intent: Option<&'static str>,
        searches: usize,
        best: f32,
        oracle: Option<bool>,
    ) -> Fixture {
        let inner = InMemoryVectorIndex::new();
        seed(&inner, "s", "doc", &["c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7"]).await;
        let index = Arc::new(CountingIndex::new(inner));
        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0]));
        let mut reranker = ScriptedReranker::new();
        for i in 0..8 {
            let score = if i == 3 { best } else { best - 10.0 };
            reranker = reranker.with(&format!("c{}", i), score);
        }
        let engine = Arc::new(RetrievalEngine::new(
            embedder.clone(),
            index.clone(),
            Arc::new(reranker),
            20,
        ));
        let oracle = Arc::new(FixedOracle::new(oracle));
        let gate = RelevanceGate::new(engine.clone(), oracle.clone());
        let classifier = Arc::new(StubClassifier {
            intent,
            searches,
            fail: false,
        });
        Fixture {
            router: DocumentRouter::new(classifier, engine, gate),
            index,
            embedder,
            oracle,
        }
    }

    #[tokio::test]
    async fn test_scenario_a_no_documents() {
        let f = fixture(Some("doc_qa"), 1, 0.0, Some(true)).await;
        let routed = f.router.decide("anything", "s", false).await;
        assert_eq!(routed.decision, d(Web, false, false));
        assert_eq!(routed.analysis.query_intent, None);
        assert_eq!(f.index.total_reads(), 0);
    }

    #[tokio::test]
    async fn test_scenario_b_summary_preview() {
        let f = fixture(Some("doc_summary"), 3, 0.0, Some(true)).await;
        let routed = f.router.decide("summarize this pdf", "s", true).await;
        assert_eq!(routed.decision.source, Documents);
        assert!(!routed.decision.doc_not_in_doc);
        assert_eq!(routed.documents.len(), 6);
        assert_eq!(routed.documents[0].metadata.chunk_index, 0);
        assert_eq!(f.index.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_with_empty_preview_falls_back() {
        let f = fixture(Some("doc_summary"), 3, 0.0, Some(true)).await;
        let routed = f.router.decide("summarize", "other-session", true).await;
        assert_eq!(routed.decision, d(Web, true, false));
        assert!(routed.documents.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_below_threshold() {
        let f = fixture(Some("doc_qa"), 1, -4.0, Some(true)).await;
        let routed = f.router.decide("what is the refund policy", "s", true).await;
        assert_eq!(routed.decision.source, NotInDoc);
        assert!(routed.decision.doc_not_in_doc);
        assert!(routed.documents.is_empty());
        assert_eq!(routed.gate.as_ref().and_then(|g| g.best_rerank_score), Some(-4.0));
        assert_eq!(f.oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scenario_d_hybrid() {
        let f = fixture(Some("doc_qa"), 3, -1.0, Some(true)).await;
        let routed = f.router.decide("what does the report say and what is new", "s", true).await;
        assert_eq!(routed.decision, d(Hybrid, false, false));
        assert_eq!(routed.documents.len(), 5);
        assert_eq!(routed.documents[0].content, "c3");
    }

    #[tokio::test]
    async fn test_single_part_question_uses_documents() {
        let f = fixture(Some("doc_qa"), 1, -1.0, Some(true)).await;
        let routed = f.router.decide("what is the refund policy", "s", true).await;
        assert_eq!(routed.decision, d(Documents, false, false));
    }

    #[tokio::test]
    async fn test_scenario_e_general_web_skips_retrieval() {
        let f = fixture(Some("general_web"), 3, 5.0, Some(true)).await;
        let routed = f.router.decide("weather in paris", "s", true).await;
        assert_eq!(routed.decision, d(Web, false, false));
        assert_eq!(f.index.total_reads(), 0);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_doc_qa() {
        let inner = InMemoryVectorIndex::new();
        seed(&inner, "s", "doc", &["c0"]).await;
        let engine = Arc::new(RetrievalEngine::new(
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Arc::new(inner),
            Arc::new(ScriptedReranker::new().with("c0", 1.0)),
            20,
        ));
        let gate = RelevanceGate::new(engine.clone(), Arc::new(FixedOracle::new(Some(true))));
        let classifier = Arc::new(StubClassifier {
            intent: None,
            searches: 0,
            fail: true,
        });
        let router = DocumentRouter::new(classifier, engine, gate);

        let routed = router.decide("refund policy", "s", true).await;
        // Fallback analysis suggests three searches, so the query counts as multi-part.
        assert_eq!(routed.analysis.suggested_searches.len(), 3);
        assert_eq!(routed.decision.source, Hybrid);
    }
}
