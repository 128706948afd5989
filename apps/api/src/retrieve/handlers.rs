//! HTTP surface of retrieval: document fetch and kind-scoped search.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::document::{Document, DocumentKind};
use crate::models::search::{RankedResult, SearchQuery};
use crate::routes::ApiError;
use crate::state::AppState;

const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub structured_filters: BTreeMap<String, String>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl SearchRequest {
    pub fn into_query(self, kind: DocumentKind) -> SearchQuery {
        SearchQuery {
            text: self.text,
            kind_filter: Some(kind),
            top_k: self.top_k,
            structured_filters: self.structured_filters,
        }
    }
}

/// POST /api/v1/search/jobs — jobs matching a free-text query.
pub async fn handle_search_jobs(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RankedResult>, ApiError> {
    let query = req.into_query(DocumentKind::Job);
    let result = state.retriever.retrieve(&query).await?;
    Ok(Json(result))
}

/// POST /api/v1/search/resumes — resumes matching a free-text query.
pub async fn handle_search_resumes(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RankedResult>, ApiError> {
    let query = req.into_query(DocumentKind::Resume);
    let result = state.retriever.retrieve(&query).await?;
    Ok(Json(result))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, ApiError> {
    fetch_kind(&state, id, DocumentKind::Resume)
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, ApiError> {
    fetch_kind(&state, id, DocumentKind::Job)
}

/// Kind-scoped lookup: a resume id requested through the jobs route is a
/// 404, not a leak across collections.
fn fetch_kind(
    state: &AppState,
    id: Uuid,
    kind: DocumentKind,
) -> Result<Json<Document>, ApiError> {
    let document = state
        .store
        .get(id)
        .filter(|d| d.kind == kind)
        .ok_or_else(|| CoreError::NotFound(format!("no {kind} with id {id}")))?;
    Ok(Json(document))
}
