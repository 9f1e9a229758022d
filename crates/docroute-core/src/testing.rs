//! In-crate fakes for the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::gate::AnswerabilityOracle;
use crate::models::ChunkMetadata;
use crate::rerank::Reranker;
use crate::store::memory::InMemoryVectorIndex;
use crate::store::{IndexEntry, IndexFilter, IndexHit, IndexedChunk, VectorIndex};

/// Store `texts` as consecutive chunks of `doc`. Earlier texts sit closer
/// to the `[1.0, 0.0]` query vector.
pub async fn seed(index: &InMemoryVectorIndex, session: &str, doc: &str, texts: &[&str]) {
    let chunks: Vec<IndexedChunk> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| IndexedChunk {
            chunk_id: format!("{}_chunk_{}", doc, i),
            content: t.to_string(),
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                session_id: session.to_string(),
                filename: format!("{}.pdf", doc),
                page_number: 1,
                chunk_index: i as u32,
                token_count: 1,
            },
        })
        .collect();
    let vectors: Vec<Vec<f32>> = (0..texts.len()).map(|i| vec![1.0, i as f32 * 0.1]).collect();
    index.upsert(&chunks, &vectors).await.unwrap();
}

pub struct FixedEmbedder {
    vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        self.vector.len()
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed_passages(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedder offline")
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedder offline")
    }
}

/// Scores texts from a lookup table; unknown texts score `0.0`.
pub struct ScriptedReranker {
    scores: HashMap<String, f32>,
    fail: bool,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedReranker {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            fail: false,
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with(mut self, text: &str, score: f32) -> Self {
        self.scores.insert(text.to_string(), score);
        self
    }

    /// Sizes of every batch scored so far.
    pub fn batch_sizes(&self) -> Arc<Mutex<Vec<usize>>> {
        self.batches.clone()
    }
}

#[async_trait]
impl Reranker for ScriptedReranker {
    async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
        self.batches.lock().unwrap().push(texts.len());
        if self.fail {
            bail!("reranker offline");
        }
        Ok(texts
            .iter()
            .map(|t| self.scores.get(t).copied().unwrap_or(0.0))
            .collect())
    }
}

/// Fixed verdict, or an error when `verdict` is `None`.
pub struct FixedOracle {
    verdict: Option<bool>,
    pub calls: AtomicUsize,
    pub excerpts_seen: Mutex<Vec<usize>>,
}

impl FixedOracle {
    pub fn new(verdict: Option<bool>) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
            excerpts_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AnswerabilityOracle for FixedOracle {
    async fn can_answer(&self, _query: &str, excerpts: &[String]) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.excerpts_seen.lock().unwrap().push(excerpts.len());
        match self.verdict {
            Some(v) => Ok(v),
            None => bail!("oracle timed out"),
        }
    }
}

/// Wraps an index and counts read calls.
pub struct CountingIndex {
    inner: InMemoryVectorIndex,
    pub queries: AtomicUsize,
    pub reads: AtomicUsize,
}

impl CountingIndex {
    pub fn new(inner: InMemoryVectorIndex) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn total_reads(&self) -> usize {
        self.queries.load(Ordering::SeqCst) + self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<()> {
        self.inner.upsert(chunks, vectors).await
    }

    async fn query(&self, vector: &[f32], session_id: &str, top_k: usize) -> Result<Vec<IndexHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, session_id, top_k).await
    }

    async fn get_all(&self, session_id: &str) -> Result<Vec<IndexEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_all(session_id).await
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<usize> {
        self.inner.delete(filter).await
    }
}
