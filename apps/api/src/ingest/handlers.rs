//! HTTP surface of the ingestion pipeline.

use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use tokio::time::{Duration, Instant};

use crate::errors::CoreError;
use crate::ingest::{parse_kind, IngestOutcome, RetryReport, SourceMetadata};
use crate::models::document::DocumentKind;
use crate::routes::ApiError;
use crate::state::AppState;

/// Embedding work per upload is bounded; a slow backend flags the
/// document for retry instead of holding the request open.
const UPLOAD_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// POST /api/v1/ingestion/upload
///
/// Multipart form with a `file` part (PDF or plain text) and a `kind`
/// part (`resume` or `job`).
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestOutcome>, ApiError> {
    let (bytes, kind, metadata) = read_upload(multipart).await?;
    let deadline = Instant::now() + UPLOAD_EMBED_TIMEOUT;
    let outcome = state
        .ingest
        .ingest(&bytes, kind, metadata, Some(deadline))
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/ingestion/retry
///
/// Re-embeds every document flagged `pending_embedding`.
pub async fn handle_retry(State(state): State<AppState>) -> Json<RetryReport> {
    Json(state.ingest.retry_pending().await)
}

async fn read_upload(
    mut multipart: Multipart,
) -> Result<(Bytes, DocumentKind, SourceMetadata), CoreError> {
    let mut bytes: Option<Bytes> = None;
    let mut kind: Option<DocumentKind> = None;
    let mut metadata = SourceMetadata::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                metadata.filename = field.file_name().map(str::to_string);
                metadata.content_type = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| CoreError::Validation(format!("failed to read file: {e}")))?,
                );
            }
            Some("kind") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| CoreError::Validation(format!("failed to read kind: {e}")))?;
                kind = Some(parse_kind(raw.trim())?);
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| CoreError::Validation("missing 'file' part".to_string()))?;
    let kind = kind.ok_or_else(|| CoreError::Validation("missing 'kind' part".to_string()))?;
    Ok((bytes, kind, metadata))
}
