//! JSON and Server-Sent Events HTTP API over the [`Orchestrator`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Backend status (index backend, degraded flag, models) |
//! | `GET`  | `/api/documents` | List committed documents |
//! | `POST` | `/api/documents` | Ingest `{filename, text}` or `{filename, data_base64}` |
//! | `DELETE` | `/api/documents/{id}` | Delete one document |
//! | `POST` | `/api/ask` | Answer `{question, top_k?}` |
//! | `POST` | `/api/ask/stream` | Answer as SSE: `thinking`, `delta`, then `done` or `error` |
//! | `POST` | `/api/clear` | Drop every document and vector |
//! | `GET`  | `/api/stats` | Document and vector counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "service_unavailable", "message": "...", "stage": "query_embedded" } }
//! ```
//!
//! `stage` is present when the failure came out of an ingest or ask state
//! machine. Unreachable or slow backends answer `503` with a plain message;
//! the backend detail is logged, not returned.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use knowledge_rag_core::models::{DocumentInput, KnowledgeBaseStats};
use knowledge_rag_core::{AskError, IngestError, RagError};

use crate::catalog::DocumentSummary;
use crate::pipeline::{AskEvent, Orchestrator, PipelineStatus};

/// Largest accepted document, after base64 decoding.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router. Exposed for tests that serve it on an ephemeral port.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/documents",
            get(handle_list_documents).post(handle_ingest),
        )
        .route("/api/documents/{id}", delete(handle_delete_document))
        .route("/api/ask", post(handle_ask))
        .route("/api/ask/stream", post(handle_ask_stream))
        .route("/api/clear", post(handle_clear))
        .route("/api/stats", get(handle_stats))
        // base64 inflates uploads by a third
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES * 4 / 3 + 64 * 1024))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(orchestrator: Arc<Orchestrator>, bind: &str) -> anyhow::Result<()> {
    let status = orchestrator.status();
    if status.degraded {
        tracing::warn!("serving with the in-memory index; documents will not survive a restart");
    }

    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, index = %status.index_backend, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
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
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    stage: Option<String>,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            stage: None,
        }
    }

    fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code.clone(),
            message: self.message.clone(),
            stage: self.stage.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.detail(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// User-facing text for errors caused by an unavailable backend.
fn unavailable_message(err: &RagError) -> &'static str {
    match err {
        RagError::EmbeddingServiceUnavailable(_) | RagError::EmbeddingTimeout { .. } => {
            "The embedding service is unavailable. Please try again later."
        }
        RagError::GenerationServiceUnavailable(_) | RagError::GenerationTimeout { .. } => {
            "The answer generation service is unavailable. Please try again later."
        }
        _ => "The vector database is unavailable. Please try again later.",
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            e if e.is_service_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            RagError::PartialIngestFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RagError::InvalidInput(_) | RagError::UnsupportedContent(_) => StatusCode::BAD_REQUEST,
            RagError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if err.is_service_unavailable() {
            tracing::warn!(error = %err, "backend unavailable");
            unavailable_message(&err).to_string()
        } else {
            if status.is_server_error() {
                tracing::error!(error = %err, "request failed");
            }
            err.to_string()
        };

        Self {
            status,
            code: err.code().to_string(),
            message,
            stage: None,
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let mut app = AppError::from(err.error);
        app.stage = Some(err.stage.to_string());
        app
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        let mut app = AppError::from(err.error);
        app.stage = Some(err.stage.to_string());
        app
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    #[serde(flatten)]
    pipeline: PipelineStatus,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline: state.orchestrator.status(),
    })
}

// ============ Documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<DocumentListResponse> {
    Json(DocumentListResponse {
        documents: state.orchestrator.list_documents(),
    })
}

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    data_base64: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Response, AppError> {
    let filename = req.filename.trim().to_string();
    if filename.is_empty() {
        return Err(AppError::bad_request("filename must not be empty"));
    }

    let report = match (req.text, req.data_base64) {
        (Some(text), None) => {
            if text.len() > MAX_UPLOAD_BYTES {
                return Err(too_large());
            }
            state
                .orchestrator
                .ingest(DocumentInput::from_text(filename, text))
                .await?
        }
        (None, Some(data)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| AppError::bad_request(format!("data_base64 is not valid base64: {}", e)))?;
            if bytes.len() > MAX_UPLOAD_BYTES {
                return Err(too_large());
            }
            state.orchestrator.ingest_bytes(filename, bytes).await?
        }
        _ => {
            return Err(AppError::bad_request(
                "exactly one of text or data_base64 must be provided",
            ))
        }
    };

    Ok((StatusCode::CREATED, Json(report)).into_response())
}

fn too_large() -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: format!("documents are limited to {} bytes", MAX_UPLOAD_BYTES),
        stage: None,
    }
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    document_id: String,
    vectors_removed: usize,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let vectors_removed = state.orchestrator.delete_document(&id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        document_id: id,
        vectors_removed,
    }))
}

// ============ Ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    let turn = state.orchestrator.ask(&req.question, req.top_k).await?;
    Ok(Json(turn).into_response())
}

fn sse_event(event: Result<AskEvent, AskError>) -> Event {
    let (name, data) = match event {
        Ok(AskEvent::Delta(text)) => ("delta", serde_json::json!({ "text": text })),
        Ok(AskEvent::Thinking(text)) => ("thinking", serde_json::json!({ "text": text })),
        Ok(AskEvent::Done { mode, sources }) => (
            "done",
            serde_json::json!({ "done": true, "mode": mode, "sources": sources }),
        ),
        Err(err) => {
            let app = AppError::from(err);
            ("error", serde_json::json!({ "error": app.detail() }))
        }
    };
    Event::default().event(name).data(data.to_string())
}

async fn handle_ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = state
        .orchestrator
        .ask_stream(&req.question, req.top_k)
        .await?;
    let stream = events.map(|event| Ok::<_, Infallible>(sse_event(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ Maintenance ============

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AppError> {
    state.orchestrator.clear_knowledge_base().await?;
    Ok(Json(ClearResponse { success: true }))
}

async fn handle_stats(
    State(state): State<AppState>,
) -> Result<Json<KnowledgeBaseStats>, AppError> {
    Ok(Json(state.orchestrator.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_rag_core::AskStage;

    #[test]
    fn test_service_unavailable_hides_backend_detail() {
        let err = AskError::new(
            AskStage::QueryEmbedded,
            RagError::EmbeddingServiceUnavailable("connection refused (os error 111)".into()),
        );
        let app = AppError::from(err);
        assert_eq!(app.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(app.code, "service_unavailable");
        assert_eq!(app.stage.as_deref(), Some("query_embedded"));
        assert!(!app.message.contains("os error"));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            AppError::from(RagError::DocumentNotFound("x".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(RagError::UnsupportedContent("bin".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
            .status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
