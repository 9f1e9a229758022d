//! Shared fixtures for the application's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::SqlitePool;

use docroute_core::embedding::Embedder;
use docroute_core::models::DocumentDescriptor;
use docroute_core::rerank::Reranker;

use crate::config::parse_config;
use crate::db;
use crate::registry::{RegistryBackend, RegistryMap};

/// A fresh SQLite database in a temporary directory. Keep the directory
/// alive for as long as the pool is used.
pub async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        "[db]\npath = \"{}\"\n",
        dir.path().join("test.sqlite").display()
    );
    let config = parse_config(&toml).unwrap();
    let pool = db::connect(&config).await.unwrap();
    (dir, pool)
}

pub fn descriptor(document_id: &str, filename: &str) -> DocumentDescriptor {
    DocumentDescriptor {
        document_id: document_id.to_string(),
        filename: filename.to_string(),
        upload_time: Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap(),
        total_chunks: 3,
        total_pages: 2,
        file_size: 1024,
        content_hash: "ab".repeat(32),
    }
}

/// Loads `preload` (empty by default) and refuses every write.
#[derive(Default)]
pub struct FailingRegistryBackend {
    pub preload: RegistryMap,
}

#[async_trait]
impl RegistryBackend for FailingRegistryBackend {
    async fn load_all(&self) -> Result<RegistryMap> {
        Ok(self.preload.clone())
    }

    async fn save_session(&self, _session_id: &str, _documents: &[DocumentDescriptor]) -> Result<()> {
        bail!("registry storage unavailable")
    }
}

/// Deterministic bag-of-bytes embedder.
pub struct StaticEmbedder {
    dims: usize,
    fail: bool,
}

impl StaticEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims, fail: false }
    }

    pub fn failing() -> Self {
        Self { dims: 4, fail: true }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dims];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dims] += b as f32;
        }
        v
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    fn model_name(&self) -> &str {
        "static"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            bail!("embedding backend down");
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            bail!("embedding backend down");
        }
        Ok(self.vector(text))
    }
}

/// Scores a text `+5.0` when it contains any query word longer than three
/// characters, `-10.0` otherwise.
#[derive(Default)]
pub struct KeywordReranker {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Reranker for KeywordReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 3)
            .collect();
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if words.iter().any(|w| t.contains(w.as_str())) {
                    5.0
                } else {
                    -10.0
                }
            })
            .collect())
    }
}

/// A local HTTP endpoint that answers every POST with `503` and counts the
/// requests it receives. Returns the base URL and the counter.
pub async fn unavailable_endpoint() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = axum::Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}
