//! JSON HTTP API.
//!
//! Exposes the chat engine and knowledge-base management over HTTP for the
//! mobile and web frontends.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/chat/send` | Send a message, receive the assistant reply |
//! | `POST`   | `/chat/sessions` | Create an empty session (welcome message only) |
//! | `GET`    | `/chat/sessions` | List sessions, most recently active first |
//! | `GET`    | `/chat/sessions/{id}` | Fetch one session with its full transcript |
//! | `DELETE` | `/chat/sessions/{id}` | Delete a session and its messages |
//! | `POST`   | `/knowledge-base/process` | Run the ingestion pipeline |
//! | `GET`    | `/knowledge-base/files` | List raw files in the knowledge-base directory |
//! | `GET`    | `/knowledge-base/documents` | List the processing ledger |
//! | `GET`    | `/knowledge-base/stats` | Ledger totals and index status |
//! | `GET`    | `/first-message` | The fixed welcome message |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::chat;
use crate::ingest;
use crate::models::{ChatMessage, ChatSession, IngestSummary, KnowledgeBaseStats, ProcessedDocument};
use crate::rag;
use crate::service::Assistant;

/// Build the full API router around a service instance.
pub fn router(service: Assistant) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat/send", post(handle_send))
        .route("/chat/sessions", post(handle_create_session))
        .route("/chat/sessions", get(handle_list_sessions))
        .route("/chat/sessions/{id}", get(handle_get_session))
        .route("/chat/sessions/{id}", delete(handle_delete_session))
        .route("/knowledge-base/process", post(handle_process))
        .route("/knowledge-base/files", get(handle_files))
        .route("/knowledge-base/documents", get(handle_documents))
        .route("/knowledge-base/stats", get(handle_stats))
        .route("/first-message", get(handle_first_message))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves requests
/// until the process is terminated.
pub async fn run_server(service: Assistant) -> anyhow::Result<()> {
    let bind_addr = service.config.server.bind.clone();
    let app = router(service);

    println!("Assistant API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Maps an engine failure to a 500, logging the full error chain server-side
/// and exposing only the top-level message.
fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
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

// ============ POST /chat/send ============

#[derive(Deserialize)]
struct SendRequest {
    message: String,
    /// Omitted or unknown ⇒ a new session is created.
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
    response: String,
    session_id: String,
    message_id: i64,
    is_new_session: bool,
}

/// Handler for `POST /chat/send`.
///
/// Runs one full responder turn: session resolution, retrieval, generation,
/// and persistence of both messages. Provider failures surface as a fixed
/// apology inside a 200 response, never as a 5xx.
async fn handle_send(
    State(service): State<Assistant>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let outcome = service
        .send_message(req.session_id.as_deref(), &req.message, req.user_id)
        .await
        .map_err(internal)?;

    Ok(Json(SendResponse {
        success: true,
        response: outcome.message.content,
        session_id: outcome.session.session_id,
        message_id: outcome.message.id,
        is_new_session: outcome.is_new_session,
    }))
}

// ============ POST /chat/sessions ============

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    #[serde(default)]
    user_id: Option<i64>,
}

/// Handler for `POST /chat/sessions`.
///
/// Creates a session holding only the fixed welcome message. The request
/// body is optional.
async fn handle_create_session(
    State(service): State<Assistant>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<ChatSession>, AppError> {
    let user_id = body.and_then(|Json(req)| req.user_id);
    let session = chat::create_session(&service.pool, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(session))
}

// ============ GET /chat/sessions ============

#[derive(Deserialize)]
struct ListSessionsQuery {
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<ChatSession>,
}

async fn handle_list_sessions(
    State(service): State<Assistant>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = chat::list_sessions(&service.pool, q.user_id, q.skip, q.limit)
        .await
        .map_err(internal)?;
    Ok(Json(SessionListResponse { sessions }))
}

// ============ GET /chat/sessions/{id} ============

#[derive(Serialize)]
struct SessionDetailResponse {
    session: ChatSession,
    messages: Vec<ChatMessage>,
}

/// Handler for `GET /chat/sessions/{id}`.
///
/// Returns the session and its full transcript in chronological order, or
/// `404` if the session does not exist.
async fn handle_get_session(
    State(service): State<Assistant>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetailResponse>, AppError> {
    let session = chat::get_session(&service.pool, &session_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("session not found: {}", session_id)))?;

    let messages = chat::session_messages(&service.pool, &session_id)
        .await
        .map_err(internal)?;

    Ok(Json(SessionDetailResponse { session, messages }))
}

// ============ DELETE /chat/sessions/{id} ============

#[derive(Serialize)]
struct DeleteSessionResponse {
    success: bool,
    message: String,
}

async fn handle_delete_session(
    State(service): State<Assistant>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    let deleted = chat::delete_session(&service.pool, &session_id)
        .await
        .map_err(internal)?;

    if !deleted {
        return Err(not_found(format!("session not found: {}", session_id)));
    }

    Ok(Json(DeleteSessionResponse {
        success: true,
        message: "Session deleted".to_string(),
    }))
}

// ============ POST /knowledge-base/process ============

#[derive(Deserialize, Default)]
struct ProcessRequest {
    #[serde(default)]
    force: bool,
}

/// Handler for `POST /knowledge-base/process`.
///
/// Runs the ingestion pipeline synchronously and returns the run summary.
/// Per-file failures are reported inside the summary; only infrastructure
/// errors (database unavailable) become a 500.
async fn handle_process(
    State(service): State<Assistant>,
    body: Option<Json<ProcessRequest>>,
) -> Result<Json<IngestSummary>, AppError> {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    let summary = service
        .process_knowledge_base(force)
        .await
        .map_err(internal)?;
    Ok(Json(summary))
}

// ============ GET /knowledge-base/files ============

#[derive(Serialize)]
struct KnowledgeBaseFile {
    filename: String,
    file_type: String,
}

#[derive(Serialize)]
struct FileListResponse {
    files: Vec<KnowledgeBaseFile>,
}

/// Handler for `GET /knowledge-base/files`.
///
/// Lists the supported files currently present in the knowledge-base
/// directory, processed or not. The ledger view of what has been ingested
/// lives at `/knowledge-base/documents`.
async fn handle_files(
    State(service): State<Assistant>,
) -> Result<Json<FileListResponse>, AppError> {
    let files = ingest::scan_knowledge_base(&service.config)
        .map_err(internal)?
        .into_iter()
        .map(|(path, file_type)| KnowledgeBaseFile {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_type,
        })
        .collect();
    Ok(Json(FileListResponse { files }))
}

// ============ GET /knowledge-base/documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<ProcessedDocument>,
}

async fn handle_documents(
    State(service): State<Assistant>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = crate::ledger::list_documents(&service.pool)
        .await
        .map_err(internal)?;
    Ok(Json(DocumentListResponse { documents }))
}

// ============ GET /knowledge-base/stats ============

async fn handle_stats(
    State(service): State<Assistant>,
) -> Result<Json<KnowledgeBaseStats>, AppError> {
    let stats = service.stats().await.map_err(internal)?;
    Ok(Json(stats))
}

// ============ GET /first-message ============

#[derive(Serialize)]
struct FirstMessageResponse {
    message: &'static str,
}

/// Handler for `GET /first-message`.
///
/// Returns the fixed welcome text, so frontends can render it before any
/// session exists.
async fn handle_first_message() -> Json<FirstMessageResponse> {
    Json(FirstMessageResponse {
        message: rag::WELCOME_MESSAGE,
    })
}
