//! Application wiring: builds every collaborator from a [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use docroute_core::chunk::Chunker;
use docroute_core::gate::RelevanceGate;
use docroute_core::retrieval::RetrievalEngine;
use docroute_core::router::DocumentRouter;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::ingest::Ingestor;
use crate::llm::{create_classifier, create_oracle, ChatClient};
use crate::migrate::run_migrations;
use crate::pipeline::QueryPipeline;
use crate::registry::{FileRegistryBackend, RegistryBackend, SessionDocumentRegistry, SqliteRegistryBackend};
use crate::rerank::create_reranker;
use crate::sqlite_store::SqliteVectorIndex;
use crate::tokenizer::create_tokenizer;
use crate::web::create_web_search;

/// Everything the CLI and the HTTP server operate on.
pub struct App {
    pub config: Config,
    pub registry: Arc<SessionDocumentRegistry>,
    pub index: Arc<SqliteVectorIndex>,
    pub engine: Arc<RetrievalEngine>,
    pub ingestor: Ingestor,
    pub pipeline: QueryPipeline,
}

impl App {
    /// Open the database (creating the schema if needed) and build the
    /// collaborators named in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        run_migrations(&pool).await.context("running migrations")?;

        let backend: Arc<dyn RegistryBackend> = match config.registry.backend.as_str() {
            "file" => {
                let path = config
                    .registry
                    .path
                    .clone()
                    .context("registry.path must be set when backend is 'file'")?;
                Arc::new(FileRegistryBackend::new(path))
            }
            _ => Arc::new(SqliteRegistryBackend::new(pool.clone())),
        };
        let registry = Arc::new(SessionDocumentRegistry::open(backend).await?);

        let index = Arc::new(SqliteVectorIndex::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let reranker = create_reranker(&config.reranker)?;
        let tokenizer = create_tokenizer(&config.chunking)?;

        let engine = Arc::new(RetrievalEngine::new(
            embedder.clone(),
            index.clone(),
            reranker,
            config.retrieval.top_k,
        ));

        let chat = ChatClient::new(&config.llm)?.map(Arc::new);
        let gate = RelevanceGate::new(engine.clone(), create_oracle(chat.clone(), &config.llm))
            .with_max_results(config.retrieval.max_results)
            .with_oracle_excerpts(config.retrieval.oracle_excerpts);
        let router = DocumentRouter::new(create_classifier(chat), engine.clone(), gate)
            .with_threshold(config.retrieval.rerank_threshold)
            .with_preview_chunks(config.retrieval.preview_chunks);

        let pipeline = QueryPipeline::new(
            registry.clone(),
            router,
            create_web_search(&config.web)?,
        );
        let ingestor = Ingestor::new(
            Chunker::new(tokenizer, config.chunking.params()),
            embedder,
            index.clone(),
            registry.clone(),
        );

        tracing::debug!(
            db = %config.db.path.display(),
            embedding = %config.embedding.provider,
            reranker = %config.reranker.provider,
            web = %config.web.provider,
            "application ready"
        );

        Ok(Self {
            config,
            registry,
            index,
            engine,
            ingestor,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[tokio::test]
    async fn test_open_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[db]\npath = \"{}\"\n[embedding]\nprovider = \"disabled\"\n",
            dir.path().join("app.sqlite").display()
        );
        let app = App::open(parse_config(&toml).unwrap()).await.unwrap();
        assert!(app.registry.sessions().await.is_empty());
        assert_eq!(app.index.count("anything").await.unwrap(), 0);

        // Disabled embedder: search degrades to empty instead of failing.
        assert!(app.engine.search("q", "s", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_open_with_file_registry() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[db]\npath = \"{}\"\n[registry]\nbackend = \"file\"\npath = \"{}\"\n[embedding]\nprovider = \"disabled\"\n",
            dir.path().join("app.sqlite").display(),
            dir.path().join("registry.json").display()
        );
        let app = App::open(parse_config(&toml).unwrap()).await.unwrap();
        let plan = app.pipeline.plan("what is rust", "s").await;
        assert!(!plan.session_has_documents);
    }
}
