//! # docroute
//!
//! Session-scoped document retrieval and evidence routing for
//! retrieval-augmented chat.
//!
//! Users upload documents into a chat session; every query is then routed
//! to the evidence that can actually answer it: the session's documents,
//! the web, or both. The routing logic itself lives in
//! [`docroute_core`]; this crate supplies the concrete collaborators,
//! persistence, and surfaces.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ page-marked  │──▶│   Ingestor   │──▶│ SQLite: chunks + │
//! │    text      │   │ chunk+embed │   │ session registry │
//! └──────────────┘   └─────────────┘   └────────┬─────────┘
//!                                               │
//!      query ──▶ QueryPipeline ─▶ DocumentRouter ┤ recall + rerank
//!                     │                          │
//!                     └──▶ web fan-out (Tavily)  ▼
//!                                          EvidencePlan
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`app`] | Builds every collaborator from a [`config::Config`] |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | SQLite vector index |
//! | [`registry`] | Session → documents registry |
//! | [`embedding`] | OpenAI, Ollama and local embedders |
//! | [`rerank`] | HTTP and local cross-encoder rerankers |
//! | [`llm`] | Chat-completion intent classifier and answerability oracle |
//! | [`web`] | Web search fan-out and ranking |
//! | [`tokenizer`] | Token counter selection |
//! | [`ingest`] | Ingestion pipeline |
//! | [`pipeline`] | Per-query evidence planning |
//! | [`server`] | HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod registry;
pub mod rerank;
pub mod server;
pub mod sqlite_store;
pub mod tokenizer;
pub mod web;

#[cfg(test)]
mod testing;
