//! Document ingestion.
//!
//! Turns page-marked document text into indexed, registered chunks:
//! chunk → embed passages → upsert into the vector index → register the
//! descriptor with the session. Registration is the commit point; if it
//! fails, the index rows written for the document are deleted again.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use docroute_core::chunk::Chunker;
use docroute_core::embedding::Embedder;
use docroute_core::models::{ChunkMetadata, DocumentDescriptor};
use docroute_core::store::{IndexFilter, IndexedChunk, VectorIndex};
use docroute_core::tokenizer::Tokenizer;

use crate::registry::SessionDocumentRegistry;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("document contains no extractable text")]
    EmptyDocument,
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("index write failed: {0:#}")]
    Index(anyhow::Error),
    #[error("registry update failed: {0:#}")]
    Registry(anyhow::Error),
}

/// Summary of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub session_id: String,
    pub document_id: String,
    pub filename: String,
    pub total_chunks: usize,
    pub total_pages: u32,
    pub total_tokens: usize,
}

pub struct Ingestor {
    chunker: Chunker<Arc<dyn Tokenizer>>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<SessionDocumentRegistry>,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker<Arc<dyn Tokenizer>>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<SessionDocumentRegistry>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            registry,
        }
    }

    pub async fn ingest(
        &self,
        session_id: &str,
        filename: &str,
        text: &str,
        file_size: u64,
    ) -> Result<IngestReport, IngestionError> {
        let document_id = Uuid::new_v4().to_string();
        let chunks = self.chunker.chunk(text, &document_id);
        if chunks.is_empty() {
            return Err(IngestionError::EmptyDocument);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_passages(&texts)
            .await
            .map_err(IngestionError::Embedding)?;
        if vectors.len() != chunks.len() {
            return Err(IngestionError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let total_pages = chunks.iter().map(|c| c.page_number).max().unwrap_or(1);
        let total_tokens = chunks.iter().map(|c| c.token_count).sum();
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .map(|c| IndexedChunk {
                metadata: ChunkMetadata {
                    document_id: document_id.clone(),
                    session_id: session_id.to_string(),
                    filename: filename.to_string(),
                    page_number: c.page_number,
                    chunk_index: c.chunk_index,
                    token_count: c.token_count,
                },
                chunk_id: c.chunk_id,
                content: c.content,
            })
            .collect();

        if let Err(e) = self.index.upsert(&indexed, &vectors).await {
            self.rollback(&document_id).await;
            return Err(IngestionError::Index(e));
        }

        let descriptor = DocumentDescriptor {
            document_id: document_id.clone(),
            filename: filename.to_string(),
            upload_time: Utc::now(),
            total_chunks: indexed.len(),
            total_pages,
            file_size,
            content_hash: content_hash(text),
        };
        if let Err(e) = self.registry.add(session_id, descriptor).await {
            self.rollback(&document_id).await;
            return Err(IngestionError::Registry(e));
        }

        tracing::info!(
            session_id,
            document_id = %document_id,
            chunks = indexed.len(),
            pages = total_pages,
            "document ingested"
        );

        Ok(IngestReport {
            session_id: session_id.to_string(),
            document_id,
            filename: filename.to_string(),
            total_chunks: indexed.len(),
            total_pages,
            total_tokens,
        })
    }

    /// Unregister a document, then delete its index rows. Returns `None`
    /// when the session has no such document.
    ///
    /// The registry entry is the commit point: if it cannot be removed the
    /// document stays listed with all of its chunks intact.
    pub async fn remove_document(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> anyhow::Result<Option<DocumentDescriptor>> {
        let Some(removed) = self.registry.remove(session_id, document_id).await? else {
            return Ok(None);
        };
        let rows = self
            .index
            .delete(&IndexFilter::Document(document_id.to_string()))
            .await
            .with_context(|| format!("deleting index rows for document {}", document_id))?;
        tracing::info!(session_id, document_id, rows, "document removed");
        Ok(Some(removed))
    }

    async fn rollback(&self, document_id: &str) {
        if let Err(e) = self
            .index
            .delete(&IndexFilter::Document(document_id.to_string()))
            .await
        {
            tracing::warn!(
                document_id,
                error = %format!("{:#}", e),
                "failed to roll back index rows"
            );
        }
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
