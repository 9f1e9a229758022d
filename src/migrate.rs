use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk rows double as the vector index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Session document registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_documents (
            session_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            document_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            upload_time TEXT NOT NULL,
            total_chunks INTEGER NOT NULL,
            total_pages INTEGER NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (session_id, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_session_id ON chunks(session_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_session_documents_order ON session_documents(session_id, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
