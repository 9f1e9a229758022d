//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the storage operations needed by
//! ingestion and the retrieval pipeline, enabling pluggable backends
//! (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ChunkMetadata;

/// A chunk ready to be stored, with its storage-time metadata.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A dense-search hit. Lower `distance` is closer.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// A stored chunk without a score, as returned by [`VectorIndex::get_all`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Selects rows for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    Session(String),
    Document(String),
}

impl IndexFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            IndexFilter::Session(id) => metadata.session_id == *id,
            IndexFilter::Document(id) => metadata.document_id == *id,
        }
    }
}

/// Stores and queries chunk vectors, filtered by session.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace chunks with their vectors |
/// | [`query`](VectorIndex::query) | Nearest chunks of one session, ascending distance |
/// | [`get_all`](VectorIndex::get_all) | Every chunk of one session, unscored |
/// | [`delete`](VectorIndex::delete) | Remove rows matching a filter |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks. `vectors[i]` belongs to `chunks[i]`.
    async fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Return at most `top_k` chunks of `session_id`, ordered by ascending distance.
    async fn query(&self, vector: &[f32], session_id: &str, top_k: usize) -> Result<Vec<IndexHit>>;

    /// Return every chunk of `session_id`. Order is unspecified.
    async fn get_all(&self, session_id: &str) -> Result<Vec<IndexEntry>>;

    /// Delete matching rows, returning how many were removed.
    async fn delete(&self, filter: &IndexFilter) -> Result<usize>;
}
