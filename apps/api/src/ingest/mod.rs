//! Ingestion pipeline: validate → extract → fields → persist → embed →
//! index.
//!
//! Failures before persistence abort with no partial document. Failures
//! (or a deadline hit) at the embed/index steps keep the persisted
//! document and flag it `pending_embedding` for a retry pass, so the store
//! never ends up in a torn state.

pub mod extract;
pub mod fields;
pub mod handlers;

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::embedding::{embed_with_retry, Embedder};
use crate::errors::CoreError;
use crate::index::VectorIndex;
use crate::models::document::{Document, DocumentKind};
use crate::perf::PerfRegistry;
use crate::store::{content_hash, DocumentStore};

/// Transport-provided details about the upload. All optional.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// What `ingest` produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document: Document,
    /// True when the upload collapsed onto an existing document by
    /// content hash.
    pub deduplicated: bool,
    /// False when the document was persisted but embedding failed or was
    /// cancelled; such documents are flagged for retry.
    pub embedded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryReport {
    pub retried: usize,
    pub still_pending: usize,
}

pub struct IngestPipeline {
    store: Arc<DocumentStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    perf: Arc<PerfRegistry>,
    max_upload_bytes: usize,
    embed_retry_max: u32,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        perf: Arc<PerfRegistry>,
        max_upload_bytes: usize,
        embed_retry_max: u32,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            perf,
            max_upload_bytes,
            embed_retry_max,
        }
    }

    /// Ingests one uploaded file. `deadline` bounds the embedding
    /// computation; when it expires the document stays persisted and
    /// flagged for retry, and the call still succeeds.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        kind: DocumentKind,
        metadata: SourceMetadata,
        deadline: Option<Instant>,
    ) -> Result<IngestOutcome, CoreError> {
        // (a) validate
        let timer = self.perf.start("ingest.validate");
        let format = self.validate(bytes, &metadata);
        timer.record(format.is_ok());
        let format = format?;

        // (b) extract text
        let timer = self.perf.start("ingest.extract");
        let raw_text = extract::extract_text(format, bytes);
        timer.record(raw_text.is_ok());
        let raw_text = raw_text?;

        // (c) structured fields
        let timer = self.perf.start("ingest.fields");
        let structured_fields = fields::extract_fields(&raw_text);
        timer.record(true);

        // (d) persist, dedup'd by content hash
        let timer = self.perf.start("ingest.persist");
        let hash = content_hash(bytes);
        let outcome = self.store.insert_document(
            kind,
            raw_text,
            structured_fields,
            hash,
            metadata.filename.clone(),
        );
        timer.record(true);

        if outcome.deduplicated {
            info!(document_id = %outcome.document.id, "upload deduplicated by content hash");
            let embedded = self.store.active_embedding(outcome.document.id).is_some();
            return Ok(IngestOutcome {
                document: outcome.document,
                deduplicated: true,
                embedded,
            });
        }

        // (e)+(f) embed and index; failure here keeps the document.
        let document = outcome.document;
        let embedded = match self.embed_and_index(&document, deadline).await {
            Ok(()) => true,
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "embedding failed, flagged for retry");
                self.store.mark_pending_embedding(document.id);
                false
            }
        };

        info!(document_id = %document.id, kind = %document.kind, embedded, "document ingested");
        Ok(IngestOutcome {
            document,
            deduplicated: false,
            embedded,
        })
    }

    /// Re-embeds every document flagged `pending_embedding`. Documents
    /// that fail again stay flagged.
    pub async fn retry_pending(&self) -> RetryReport {
        let pending = self.store.pending_embedding_ids();
        let mut retried = 0;

        for id in &pending {
            let Some(document) = self.store.get(*id) else {
                continue;
            };
            match self.embed_and_index(&document, None).await {
                Ok(()) => retried += 1,
                Err(e) => {
                    warn!(document_id = %id, error = %e, "retry embedding failed");
                }
            }
        }

        RetryReport {
            retried,
            still_pending: self.store.pending_embedding_ids().len(),
        }
    }

    fn validate(
        &self,
        bytes: &[u8],
        metadata: &SourceMetadata,
    ) -> Result<extract::FileFormat, CoreError> {
        if bytes.is_empty() {
            return Err(CoreError::Validation("uploaded file is empty".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(CoreError::Validation(format!(
                "file of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        extract::detect_format(
            metadata.filename.as_deref(),
            metadata.content_type.as_deref(),
            bytes,
        )
    }

    async fn embed_and_index(
        &self,
        document: &Document,
        deadline: Option<Instant>,
    ) -> Result<(), CoreError> {
        let timer = self.perf.start("ingest.embed");
        let embed = embed_with_retry(
            self.embedder.as_ref(),
            &document.raw_text,
            self.embed_retry_max,
        );
        let vector = match deadline {
            Some(at) => match tokio::time::timeout_at(at, embed).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::TransientBackend(
                    "embedding cancelled by caller deadline".to_string(),
                )),
            },
            None => embed.await,
        };
        timer.record(vector.is_ok());
        let vector = vector?;

        let timer = self.perf.start("ingest.index");
        let result = self
            .store
            .put_embedding(document.id, vector, self.embedder.model_version())
            .and_then(|record| self.index.upsert(&record, document.kind));
        timer.record(result.is_ok());
        result
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_embedding_ids().len()
    }

    #[cfg(test)]
    fn store(&self) -> &DocumentStore {
        &self.store
    }
}

/// Parses the `kind` form field of an upload.
pub fn parse_kind(raw: &str) -> Result<DocumentKind, CoreError> {
    raw.parse::<DocumentKind>().map_err(CoreError::Validation)
}
