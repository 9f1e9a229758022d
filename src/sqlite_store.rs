//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Chunk rows carry their embedding as a little-endian `f32` BLOB. Queries
//! load the session's rows and rank them by brute-force cosine distance,
//! which is adequate for per-session document sets.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docroute_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use docroute_core::models::ChunkMetadata;
use docroute_core::store::{IndexEntry, IndexFilter, IndexHit, IndexedChunk, VectorIndex};

/// SQLite implementation of the [`VectorIndex`] trait over the `chunks` table.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of chunk rows stored for a session.
    pub async fn count(&self, session_id: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn metadata_from_row(row: &SqliteRow) -> ChunkMetadata {
    ChunkMetadata {
        document_id: row.get("document_id"),
        session_id: row.get("session_id"),
        filename: row.get("filename"),
        page_number: row.get::<i64, _>("page_number") as u32,
        chunk_index: row.get::<i64, _>("chunk_index") as u32,
        token_count: row.get::<i64, _>("token_count") as usize,
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, chunks: &[IndexedChunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let meta = &chunk.metadata;
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, document_id, session_id, filename, page_number,
                                    chunk_index, token_count, content, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    session_id = excluded.session_id,
                    filename = excluded.filename,
                    page_number = excluded.page_number,
                    chunk_index = excluded.chunk_index,
                    token_count = excluded.token_count,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&meta.document_id)
            .bind(&meta.session_id)
            .bind(&meta.filename)
            .bind(meta.page_number as i64)
            .bind(meta.chunk_index as i64)
            .bind(meta.token_count as i64)
            .bind(&chunk.content)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], session_id: &str, top_k: usize) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, session_id, filename, page_number, chunk_index,
                   token_count, content, embedding
            FROM chunks
            WHERE session_id = ?
            ORDER BY document_id, chunk_index
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexHit {
                    content: row.get("content"),
                    metadata: metadata_from_row(row),
                    distance: cosine_distance(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_all(&self, session_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, session_id, filename, page_number, chunk_index,
                   token_count, content
            FROM chunks
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexEntry {
                content: row.get("content"),
                metadata: metadata_from_row(row),
            })
            .collect())
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<usize> {
        let result = match filter {
            IndexFilter::Session(id) => {
                sqlx::query("DELETE FROM chunks WHERE session_id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            IndexFilter::Document(id) => {
                sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use crate::testing::test_pool;

    fn chunk(session: &str, doc: &str, index: u32, text: &str) -> IndexedChunk {
        IndexedChunk {
            chunk_id: format!("{}_chunk_{}", doc, index),
            content: text.to_string(),
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                session_id: session.to_string(),
                filename: "report.pdf".to_string(),
                page_number: index + 1,
                chunk_index: index,
                token_count: 4,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_query_roundtrip() {
        let (_dir, pool) = test_pool().await;
        run_migrations(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool);

        index
            .upsert(
                &[
                    chunk("s1", "d1", 0, "north"),
                    chunk("s1", "d1", 1, "east"),
                    chunk("s2", "d2", 0, "elsewhere"),
                ],
                &[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.1], "s1", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "east");
        assert_eq!(hits[0].metadata.page_number, 2);
        assert!(hits[0].distance < hits[1].distance);
        assert_eq!(index.count("s2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let (_dir, pool) = test_pool().await;
        run_migrations(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool);

        index.upsert(&[chunk("s", "d", 0, "old")], &[vec![1.0]]).await.unwrap();
        index.upsert(&[chunk("s", "d", 0, "new")], &[vec![1.0]]).await.unwrap();

        let all = index.get_all("s").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "new");
    }

    #[tokio::test]
    async fn test_delete_by_document_and_session() {
        let (_dir, pool) = test_pool().await;
        run_migrations(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool);

        index
            .upsert(
                &[chunk("s", "a", 0, "x"), chunk("s", "a", 1, "y"), chunk("s", "b", 0, "z")],
                &[vec![1.0], vec![1.0], vec![1.0]],
            )
            .await
            .unwrap();

        assert_eq!(index.delete(&IndexFilter::Document("a".into())).await.unwrap(), 2);
        assert_eq!(index.count("s").await.unwrap(), 1);
        assert_eq!(index.delete(&IndexFilter::Session("s".into())).await.unwrap(), 1);
        assert_eq!(index.count("s").await.unwrap(), 0);
    }
}
