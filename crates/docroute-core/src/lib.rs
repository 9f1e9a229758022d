//! # docroute core
//!
//! Runtime-agnostic retrieval-and-routing logic for docroute: the
//! page-aware chunker, the two-stage retrieval engine, the relevance gate,
//! and the evidence router.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Every external capability (tokenizer, embedder, vector index, reranker,
//! intent classifier, answerability oracle) is consumed through a trait so
//! the application crate can plug in real backends and tests can plug in
//! fakes.
//!
//! ## Data flow
//!
//! ```text
//! text ──▶ Chunker ──▶ Embedder ──▶ VectorIndex
//!                                        │
//! query ──▶ IntentClassifier             ▼
//!             │            RetrievalEngine (dense → rerank)
//!             │                          │
//!             │                    RelevanceGate ◀── AnswerabilityOracle
//!             ▼                          │
//!           route() ◀────────────────────┘
//!             │
//!             ▼
//!       RoutingDecision
//! ```

pub mod chunk;
pub mod embedding;
pub mod gate;
pub mod intent;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod router;
pub mod store;
pub mod tokenizer;

#[cfg(test)]
mod testing;
