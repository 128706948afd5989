use axum::extract::State;
use axum::Json;

use crate::perf::StageSnapshot;
use crate::state::AppState;

/// GET /api/v1/perf
/// Per-stage timing counters, sorted by stage name.
pub async fn handle_perf(State(state): State<AppState>) -> Json<Vec<StageSnapshot>> {
    Json(state.perf.snapshot())
}
