//! Session document registry.
//!
//! Maps each chat session to the ordered list of documents uploaded into
//! it. The registry keeps the whole mapping in memory behind a tokio
//! [`RwLock`]: readers share the lock, and every mutation takes the write
//! lock, persists the new list through a [`RegistryBackend`], and only then
//! commits it to memory. A failed write leaves the in-memory view untouched.
//!
//! Reads never touch durable storage. Call
//! [`SessionDocumentRegistry::refresh`] to pick up changes made by another
//! process.
//!
//! Two backends are provided:
//!
//! | Backend | Storage |
//! |---------|---------|
//! | [`SqliteRegistryBackend`] | `session_documents` table next to the chunk index |
//! | [`FileRegistryBackend`] | A JSON file, rewritten atomically via rename |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, RwLock};

use docroute_core::models::DocumentDescriptor;

pub type RegistryMap = HashMap<String, Vec<DocumentDescriptor>>;

/// Durable storage for the registry.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Load every session's documents, in upload order.
    async fn load_all(&self) -> Result<RegistryMap>;

    /// Replace one session's list. An empty list removes the session.
    async fn save_session(&self, session_id: &str, documents: &[DocumentDescriptor]) -> Result<()>;
}

pub struct SessionDocumentRegistry {
    backend: Arc<dyn RegistryBackend>,
    state: RwLock<RegistryMap>,
}

impl SessionDocumentRegistry {
    /// Load the registry from `backend`.
    pub async fn open(backend: Arc<dyn RegistryBackend>) -> Result<Self> {
        let state = backend.load_all().await.context("loading session registry")?;
        tracing::debug!(sessions = state.len(), "session registry loaded");
        Ok(Self {
            backend,
            state: RwLock::new(state),
        })
    }

    pub async fn has_documents(&self, session_id: &str) -> bool {
        self.state
            .read()
            .await
            .get(session_id)
            .is_some_and(|docs| !docs.is_empty())
    }

    /// Documents of a session in upload order.
    pub async fn documents(&self, session_id: &str) -> Vec<DocumentDescriptor> {
        self.state
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn document(&self, session_id: &str, document_id: &str) -> Option<DocumentDescriptor> {
        self.state
            .read()
            .await
            .get(session_id)
            .and_then(|docs| docs.iter().find(|d| d.document_id == document_id).cloned())
    }

    pub async fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Append a document to a session, persisting before committing.
    pub async fn add(&self, session_id: &str, descriptor: DocumentDescriptor) -> Result<()> {
        let mut state = self.state.write().await;
        let mut docs = state.get(session_id).cloned().unwrap_or_default();
        docs.retain(|d| d.document_id != descriptor.document_id);
        let document_id = descriptor.document_id.clone();
        docs.push(descriptor);

        self.backend
            .save_session(session_id, &docs)
            .await
            .with_context(|| format!("persisting registry for session {}", session_id))?;

        let count = docs.len();
        state.insert(session_id.to_string(), docs);
        tracing::info!(session_id, document_id = %document_id, documents = count, "document registered");
        Ok(())
    }

    /// Remove one document. Returns the removed descriptor, or `None` when
    /// the session has no such document.
    pub async fn remove(&self, session_id: &str, document_id: &str) -> Result<Option<DocumentDescriptor>> {
        let mut state = self.state.write().await;
        let Some(current) = state.get(session_id) else {
            return Ok(None);
        };
        let Some(pos) = current.iter().position(|d| d.document_id == document_id) else {
            return Ok(None);
        };

        let mut docs = current.clone();
        let removed = docs.remove(pos);
        self.backend
            .save_session(session_id, &docs)
            .await
            .with_context(|| format!("persisting registry for session {}", session_id))?;

        if docs.is_empty() {
            state.remove(session_id);
        } else {
            state.insert(session_id.to_string(), docs);
        }
        tracing::info!(session_id, document_id, "document unregistered");
        Ok(Some(removed))
    }

    /// Reload the whole mapping from durable storage.
    pub async fn refresh(&self) -> Result<()> {
        let fresh = self.backend.load_all().await.context("reloading session registry")?;
        *self.state.write().await = fresh;
        Ok(())
    }
}

// ============ SQLite backend ============

/// Stores descriptors in the `session_documents` table.
pub struct SqliteRegistryBackend {
    pool: SqlitePool,
}

impl SqliteRegistryBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryBackend for SqliteRegistryBackend {
    async fn load_all(&self) -> Result<RegistryMap> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, document_id, filename, upload_time, total_chunks,
                   total_pages, file_size, content_hash
            FROM session_documents
            ORDER BY session_id, position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut map = RegistryMap::new();
        for row in rows {
            let session_id: String = row.get("session_id");
            let upload_time: String = row.get("upload_time");
            let upload_time = DateTime::parse_from_rfc3339(&upload_time)
                .with_context(|| format!("bad upload_time '{}' in registry", upload_time))?
                .with_timezone(&Utc);
            map.entry(session_id).or_default().push(DocumentDescriptor {
                document_id: row.get("document_id"),
                filename: row.get("filename"),
                upload_time,
                total_chunks: row.get::<i64, _>("total_chunks") as usize,
                total_pages: row.get::<i64, _>("total_pages") as u32,
                file_size: row.get::<i64, _>("file_size") as u64,
                content_hash: row.get("content_hash"),
            });
        }
        Ok(map)
    }

    async fn save_session(&self, session_id: &str, documents: &[DocumentDescriptor]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM session_documents WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        for (position, doc) in documents.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO session_documents (session_id, position, document_id, filename,
                                               upload_time, total_chunks, total_pages,
                                               file_size, content_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(position as i64)
            .bind(&doc.document_id)
            .bind(&doc.filename)
            .bind(doc.upload_time.to_rfc3339())
            .bind(doc.total_chunks as i64)
            .bind(doc.total_pages as i64)
            .bind(doc.file_size as i64)
            .bind(&doc.content_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ============ JSON file backend ============

/// Stores the whole mapping as one JSON object keyed by session id.
///
/// Each save is a read-modify-write of the file, serialized by an internal
/// lock and published with an atomic rename.
pub struct FileRegistryBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRegistryBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_file(&self) -> Result<RegistryMap> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(RegistryMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse registry file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read registry file {}", self.path.display())),
        }
    }
}

#[async_trait]
impl RegistryBackend for FileRegistryBackend {
    async fn load_all(&self) -> Result<RegistryMap> {
        self.read_file().await
    }

    async fn save_session(&self, session_id: &str, documents: &[DocumentDescriptor]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.read_file().await?;
        if documents.is_empty() {
            map.remove(session_id);
        } else {
            map.insert(session_id.to_string(), documents.to_vec());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
