//! HTTP surface.
//!
//! A thin JSON API over the [`App`]: document upload and management per
//! session, two-stage search, and evidence routing. Answer generation and
//! streaming live in the calling service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions/{id}/documents` | Ingest page-marked document text |
//! | `GET`    | `/sessions/{id}/documents` | List a session's documents in upload order |
//! | `DELETE` | `/sessions/{id}/documents/{doc}` | Remove a document and its chunks |
//! | `POST`   | `/documents/search` | Dense recall + rerank within a session |
//! | `POST`   | `/route` | Classify, gate and route a query; gather evidence |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `empty_document` (400), `not_found` (404),
//! `embedding_failed` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docroute_core::models::{DocumentDescriptor, RetrievalCandidate};

use crate::app::App;
use crate::ingest::{IngestReport, IngestionError};
use crate::pipeline::EvidencePlan;

/// Serve until the process is terminated.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let router = build_router(app);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("docroute listening on http://{}", bind_addr);
    axum::serve(listener, router).await?;

    Ok(())
}

pub fn build_router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/sessions/{id}/documents",
            post(handle_upload).get(handle_list_documents),
        )
        .route("/sessions/{id}/documents/{doc}", delete(handle_delete_document))
        .route("/documents/search", post(handle_search))
        .route("/route", post(handle_route))
        .layer(cors)
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        let (status, code) = match &err {
            IngestionError::EmptyDocument => (StatusCode::BAD_REQUEST, "empty_document"),
            IngestionError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            IngestionError::Index(_) | IngestionError::Registry(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        tracing::warn!(code, error = %err, "ingestion failed");
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /sessions/{id}/documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// Extracted text with `--- Page N ---` markers.
    text: String,
    #[serde(default)]
    file_size: Option<u64>,
}

async fn handle_upload(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<IngestReport>), AppError> {
    require_non_empty("filename", &req.filename)?;
    let file_size = req.file_size.unwrap_or(req.text.len() as u64);
    let report = app
        .ingestor
        .ingest(&session_id, &req.filename, &req.text, file_size)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Serialize)]
struct DocumentListResponse {
    session_id: String,
    documents: Vec<DocumentDescriptor>,
}

async fn handle_list_documents(
    State(app): State<Arc<App>>,
    Path(session_id): Path<String>,
) -> Json<DocumentListResponse> {
    let documents = app.registry.documents(&session_id).await;
    Json(DocumentListResponse {
        session_id,
        documents,
    })
}

#[derive(Serialize)]
struct DeleteResponse {
    removed: DocumentDescriptor,
}

async fn handle_delete_document(
    State(app): State<Arc<App>>,
    Path((session_id, document_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, AppError> {
    let removed = app
        .ingestor
        .remove_document(&session_id, &document_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            not_found(format!(
                "document {} not found in session {}",
                document_id, session_id
            ))
        })?;
    Ok(Json(DeleteResponse { removed }))
}

// ============ POST /documents/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    session_id: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievalCandidate>,
}

async fn handle_search(
    State(app): State<Arc<App>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    require_non_empty("query", &req.query)?;
    let max_results = req
        .max_results
        .unwrap_or(app.config.retrieval.max_results)
        .max(1);
    let results = app.engine.search(&req.query, &req.session_id, max_results).await;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /route ============

#[derive(Deserialize)]
struct RouteRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_route(
    State(app): State<Arc<App>>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<EvidencePlan>, AppError> {
    require_non_empty("query", &req.query)?;
    let session_id = req.session_id.unwrap_or_default();
    Ok(Json(app.pipeline.plan(&req.query, &session_id).await))
}
