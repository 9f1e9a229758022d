//! In-memory [`VectorIndex`] implementation for tests and embedding.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Queries are brute-force
//! cosine distance over the session's rows.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;

use super::{IndexEntry, IndexFilter, IndexHit, IndexedChunk, VectorIndex};

struct Row {
    chunk: IndexedChunk,
    vector: Vec<f32>,
}

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    rows: RwLock<Vec<Row>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks across all sessions.
    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let mut rows = self.rows.write().map_err(poisoned)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            rows.retain(|r| r.chunk.chunk_id != chunk.chunk_id);
            rows.push(Row {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], session_id: &str, top_k: usize) -> Result<Vec<IndexHit>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let mut hits: Vec<IndexHit> = rows
            .iter()
            .filter(|r| r.chunk.metadata.session_id == session_id)
            .map(|r| IndexHit {
                content: r.chunk.content.clone(),
                metadata: r.chunk.metadata.clone(),
                distance: cosine_distance(vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_all(&self, session_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.chunk.metadata.session_id == session_id)
            .map(|r| IndexEntry {
                content: r.chunk.content.clone(),
                metadata: r.chunk.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|r| !filter.matches(&r.chunk.metadata));
        Ok(before - rows.len())
    }
}
