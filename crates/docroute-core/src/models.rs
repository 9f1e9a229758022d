//! Data types that flow through ingestion, retrieval, and routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token-bounded, page-tagged excerpt of a document.
///
/// Immutable once created. Chunks are owned by their document and are
/// removed from the index when the document is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    /// Page of the first paragraph that contributed to this chunk (1-based).
    pub page_number: u32,
    /// 0-based position in reading order.
    pub chunk_index: u32,
    pub token_count: usize,
    /// Leading bytes of `content` repeated from the previous chunk.
    #[serde(default)]
    pub overlap_len: usize,
}

impl DocumentChunk {
    /// The part of the content that was not carried over from the previous chunk.
    pub fn fresh_content(&self) -> &str {
        let start = self.overlap_len.min(self.content.len());
        self.content.get(start..).unwrap_or("").trim_start()
    }
}

/// Metadata attached to each chunk when it is stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub session_id: String,
    pub filename: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub token_count: usize,
}

/// A chunk returned by retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// `1 - distance` from the dense stage. `1.0` for preview reads.
    pub similarity_score: f32,
    /// Cross-encoder score; present only after the rerank stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Query intent relative to the session's uploaded documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// General overview of the uploaded document ("summarise this pdf").
    DocSummary,
    /// Specific question expected to be answered from the document first.
    DocQa,
    /// Clearly unrelated to any uploaded document.
    GeneralWeb,
}

impl QueryIntent {
    /// Coerce a raw classifier value into an intent.
    ///
    /// Missing, empty, or unrecognized values become [`QueryIntent::DocQa`].
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "doc_summary" => QueryIntent::DocSummary,
            Some(s) if s == "general_web" => QueryIntent::GeneralWeb,
            _ => QueryIntent::DocQa,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::DocSummary => "doc_summary",
            QueryIntent::DocQa => "doc_qa",
            QueryIntent::GeneralWeb => "general_web",
        }
    }
}

/// Output of the intent classifier, passed through to the UI for sub-query display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_type: String,
    pub search_intent: String,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub suggested_searches: Vec<String>,
    /// 1–10.
    pub complexity_score: u8,
    #[serde(default)]
    pub requires_real_time: bool,
    /// Raw intent value as produced by the classifier; `None` when the
    /// session has no documents. Coerced with [`QueryIntent::coerce`].
    #[serde(default)]
    pub query_intent: Option<String>,
}

/// Registry record describing one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub document_id: String,
    pub filename: String,
    pub upload_time: DateTime<Utc>,
    pub total_chunks: usize,
    pub total_pages: u32,
    pub file_size: u64,
    #[serde(default)]
    pub content_hash: String,
}

/// Where the answer's evidence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Documents,
    Web,
    Hybrid,
    /// The document cannot answer; a fresh web search is run and the
    /// generation step must disclose that the document lacked the answer.
    NotInDoc,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Documents => "documents",
            EvidenceSource::Web => "web",
            EvidenceSource::Hybrid => "hybrid",
            EvidenceSource::NotInDoc => "not_in_doc",
        }
    }

    /// Whether this source requires a web search.
    pub fn needs_web(&self) -> bool {
        !matches!(self, EvidenceSource::Documents)
    }

    /// Whether this source carries document evidence into generation.
    pub fn uses_documents(&self) -> bool {
        matches!(self, EvidenceSource::Documents | EvidenceSource::Hybrid)
    }
}

/// Final per-query routing outcome. Computed fresh per query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub source: EvidenceSource,
    pub rag_fallback_used: bool,
    pub doc_not_in_doc: bool,
}

impl RoutingDecision {
    pub fn plain(source: EvidenceSource) -> Self {
        Self {
            source,
            rag_fallback_used: false,
            doc_not_in_doc: false,
        }
    }
}
