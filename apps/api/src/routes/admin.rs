//! Operational endpoints: corpus stats, index rebuild, and the
//! export/import migration path.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::models::document::DocumentKind;
use crate::routes::ApiError;
use crate::state::AppState;
use crate::store::{ImportSummary, StoreExport};

#[derive(Serialize)]
pub struct AdminStats {
    pub documents: usize,
    pub resumes: usize,
    pub jobs: usize,
    pub indexed: usize,
    pub pending_embeddings: usize,
    pub embedding_model: String,
    pub embedding_dim: usize,
}

/// GET /api/v1/admin/stats
pub async fn handle_stats(State(state): State<AppState>) -> Json<AdminStats> {
    Json(AdminStats {
        documents: state.store.document_count(),
        resumes: state.store.count_by_kind(DocumentKind::Resume),
        jobs: state.store.count_by_kind(DocumentKind::Job),
        indexed: state.index.len(),
        pending_embeddings: state.ingest.pending_count(),
        embedding_model: state.embedder.model_version().to_string(),
        embedding_dim: state.embedder.dimension(),
    })
}

#[derive(Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
}

/// POST /api/v1/admin/rebuild
///
/// Rebuilds the vector index from the store's active embeddings and
/// swaps it in atomically; queries in flight keep their old snapshot.
pub async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildReport>, ApiError> {
    let indexed = state.index.rebuild_from(&state.store)?;
    info!(indexed, "index rebuilt");
    Ok(Json(RebuildReport { indexed }))
}

/// GET /api/v1/admin/export
pub async fn handle_export(State(state): State<AppState>) -> Json<StoreExport> {
    Json(state.store.export())
}

/// POST /api/v1/admin/import
///
/// Loads an export and rebuilds the index so imported embeddings become
/// searchable in the same call.
pub async fn handle_import(
    State(state): State<AppState>,
    Json(export): Json<StoreExport>,
) -> Result<Json<ImportSummary>, ApiError> {
    let summary = state.store.import(export)?;
    state.index.rebuild_from(&state.store)?;
    info!(
        imported = summary.documents_imported,
        skipped = summary.documents_skipped,
        "store import complete"
    );
    Ok(Json(summary))
}
