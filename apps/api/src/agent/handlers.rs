//! HTTP surface of agent-enhanced search.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::models::document::DocumentKind;
use crate::models::search::{RankedResult, SearchQuery};
use crate::routes::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentSearchRequest {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Optional collection scope; omitted searches both kinds.
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub structured_filters: BTreeMap<String, String>,
}

fn default_top_k() -> usize {
    10
}

/// POST /api/v1/agent/search
///
/// Base retrieval followed by bounded refinement. Refinement failures
/// never fail the request; the response trace records how far it got.
pub async fn handle_agent_search(
    State(state): State<AppState>,
    Json(req): Json<AgentSearchRequest>,
) -> Result<Json<RankedResult>, ApiError> {
    let query = SearchQuery {
        text: req.text,
        kind_filter: req.kind,
        top_k: req.top_k,
        structured_filters: req.structured_filters,
    };
    let base = state.retriever.retrieve(&query).await?;
    let refined = state.agent.refine(&query, base).await;
    Ok(Json(refined))
}
