//! Per-query evidence planning.
//!
//! ```text
//! registry.has_documents ─▶ DocumentRouter::decide ─▶ web fan-out (if the
//!                            (classify, preview/gate,   source needs web)
//!                             route)
//! ```
//!
//! The result is an [`EvidencePlan`]: everything the generation step needs
//! to know about where the answer comes from, without generating it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use docroute_core::models::{QueryAnalysis, RetrievalCandidate, RoutingDecision};
use docroute_core::router::{DocumentRouter, GateOutcome};

use crate::registry::SessionDocumentRegistry;
use crate::web::{search_multiple, search_terms, WebResult, WebSearch};

#[derive(Debug, Clone, Serialize)]
pub struct EvidencePlan {
    pub session_id: String,
    pub session_has_documents: bool,
    pub analysis: QueryAnalysis,
    pub decision: RoutingDecision,
    pub outcome: GateOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_rerank_score: Option<f32>,
    pub documents: Vec<RetrievalCandidate>,
    pub search_terms: Vec<String>,
    pub web: Vec<WebResult>,
}

pub struct QueryPipeline {
    registry: Arc<SessionDocumentRegistry>,
    router: DocumentRouter,
    web: Arc<dyn WebSearch>,
}

impl QueryPipeline {
    pub fn new(
        registry: Arc<SessionDocumentRegistry>,
        router: DocumentRouter,
        web: Arc<dyn WebSearch>,
    ) -> Self {
        Self {
            registry,
            router,
            web,
        }
    }

    pub async fn plan(&self, query: &str, session_id: &str) -> EvidencePlan {
        let has_documents = self.registry.has_documents(session_id).await;
        let routed = self.router.decide(query, session_id, has_documents).await;

        let (terms, web) = if routed.decision.source.needs_web() {
            let terms = search_terms(query, &routed.analysis);
            let web = search_multiple(
                self.web.clone(),
                &terms,
                routed.analysis.requires_real_time,
                Utc::now(),
            )
            .await;
            tracing::debug!(session_id, terms = terms.len(), results = web.len(), "web evidence");
            (terms, web)
        } else {
            (Vec::new(), Vec::new())
        };

        EvidencePlan {
            session_id: session_id.to_string(),
            session_has_documents: has_documents,
            best_rerank_score: routed.gate.as_ref().and_then(|g| g.best_rerank_score),
            analysis: routed.analysis,
            decision: routed.decision,
            outcome: routed.outcome,
            documents: routed.documents,
            search_terms: terms,
            web,
        }
    }
}
