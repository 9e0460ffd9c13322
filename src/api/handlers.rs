//! HTTP request handlers

use super::sse::{reply_stream, DEFAULT_FRAGMENT_CHARS};
use super::types::{
    CreateThreadResponse, ErrorResponse, HistoryResponse, StreamQuery, SuccessResponse,
    TurnRequest, TurnResponse,
};
use super::AppState;
use crate::checkpoint::CheckpointError;
use crate::conversation::ThreadStats;
use crate::llm::ActiveModelStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MAX_THREAD_ID_LEN: usize = 128;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Threads
        .route("/api/threads", post(create_thread))
        .route("/api/threads/:id/turns", post(process_turn))
        .route("/api/threads/:id/turns/stream", post(stream_turn))
        .route("/api/threads/:id/stats", get(get_stats))
        .route("/api/threads/:id/messages", get(get_history))
        .route("/api/threads/:id/reset", post(reset_thread))
        // Active model
        .route("/api/model", get(model_status))
        .route("/api/model/reset", post(reset_model))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

fn validate_thread_id(id: &str) -> Result<(), AppError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_THREAD_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid thread id".to_string()))
    }
}

fn validate_text(text: &str) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }
    Ok(())
}

// ============================================================
// Threads
// ============================================================

async fn create_thread(State(state): State<AppState>) -> Result<Json<CreateThreadResponse>, AppError> {
    let thread_id = uuid::Uuid::new_v4().to_string();
    let stats = state.service.reset_thread(&thread_id).await?;
    Ok(Json(CreateThreadResponse { thread_id, stats }))
}

async fn process_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    validate_thread_id(&id)?;
    validate_text(&req.text)?;

    let reply = state.service.process_turn(&id, &req.text).await;
    let stats = state.service.get_stats(&id).await?;

    Ok(Json(TurnResponse {
        response: reply.text,
        degraded: reply.degraded,
        stats,
    }))
}

async fn stream_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, AppError> {
    validate_thread_id(&id)?;
    validate_text(&req.text)?;

    let reply = state.service.process_turn(&id, &req.text).await;
    let stats = state.service.get_stats(&id).await?;
    let chunk = query.chunk.unwrap_or(DEFAULT_FRAGMENT_CHARS);

    Ok(reply_stream(&reply, &stats, chunk).into_response())
}

async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadStats>, AppError> {
    validate_thread_id(&id)?;
    Ok(Json(state.service.get_stats(&id).await?))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    validate_thread_id(&id)?;
    let messages = state.service.get_history(&id).await?;
    Ok(Json(HistoryResponse {
        thread_id: id,
        messages,
    }))
}

async fn reset_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadStats>, AppError> {
    validate_thread_id(&id)?;
    Ok(Json(state.service.reset_thread(&id).await?))
}

// ============================================================
// Active model
// ============================================================

async fn model_status(State(state): State<AppState>) -> Json<ActiveModelStatus> {
    Json(state.service.model().status())
}

async fn reset_model(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.service.model().reset();
    Json(SuccessResponse { success: true })
}

async fn get_version() -> &'static str {
    concat!("parley ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl From<CheckpointError> for AppError {
    fn from(e: CheckpointError) -> Self {
        tracing::error!(error = %e, "Checkpoint store failed");
        AppError::Internal("Storage unavailable".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
