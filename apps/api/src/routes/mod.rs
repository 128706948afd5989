pub mod admin;
pub mod health;
pub mod perf;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::agent::handlers as agent_handlers;
use crate::errors::CoreError;
use crate::ingest::handlers as ingest_handlers;
use crate::retrieve::handlers as search_handlers;
use crate::state::AppState;

/// Transport wrapper over `CoreError`.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, ApiError>`;
/// the status mapping lives here and nowhere else.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            CoreError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            CoreError::TransientBackend(msg) => {
                tracing::warn!("Backend unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "BACKEND_UNAVAILABLE",
                    "A backing service is temporarily unavailable".to_string(),
                )
            }
            CoreError::StaleIndex { .. } => (
                StatusCode::CONFLICT,
                "STALE_INDEX",
                self.0.to_string(),
            ),
            CoreError::DimensionMismatch { .. } => {
                tracing::error!("Dimension mismatch: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DIMENSION_MISMATCH",
                    self.0.to_string(),
                )
            }
            CoreError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            // Absorbed by the orchestrator; a handler returning this is a bug.
            CoreError::AgentAborted(msg) => {
                tracing::error!("Agent abort leaked to transport: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
            CoreError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_upload = state.config.max_upload_bytes;

    let api = Router::new()
        // Ingestion
        .route(
            "/ingestion/upload",
            post(ingest_handlers::handle_upload).layer(DefaultBodyLimit::max(max_upload * 2)),
        )
        .route("/ingestion/retry", post(ingest_handlers::handle_retry))
        // Documents
        .route("/resumes/:id", get(search_handlers::handle_get_resume))
        .route("/jobs/:id", get(search_handlers::handle_get_job))
        // Search
        .route("/search/jobs", post(search_handlers::handle_search_jobs))
        .route(
            "/search/resumes",
            post(search_handlers::handle_search_resumes),
        )
        // Agent-enhanced search
        .route("/agent/search", post(agent_handlers::handle_agent_search))
        // Observability
        .route("/perf", get(perf::handle_perf))
        // Admin
        .route("/admin/stats", get(admin::handle_stats))
        .route("/admin/rebuild", post(admin::handle_rebuild))
        .route("/admin/export", get(admin::handle_export))
        .route("/admin/import", post(admin::handle_import));

    Router::new()
        .route("/health", get(health::health_handler))
        .nest(&state.config.api_prefix, api)
        .with_state(state)
}
