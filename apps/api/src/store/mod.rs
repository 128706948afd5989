//! Document Store — durable record of ingested documents and their
//! embeddings.
//!
//! The store is the single source of truth; the vector index is a derived
//! cache rebuilt from here. Documents are immutable once inserted, dedup'd
//! by content hash per kind. Embeddings are append-only: a re-embed inserts
//! a new record and deactivates the superseded one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::document::{Document, DocumentKind, EmbeddingRecord};

/// SHA-256 hex of the original upload bytes. The dedup key, together with
/// the document kind.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default)]
struct StoreInner {
    documents: HashMap<Uuid, Document>,
    by_hash: HashMap<(DocumentKind, String), Uuid>,
    /// Full embedding history per document; at most one active record per
    /// model version.
    embeddings: HashMap<Uuid, Vec<EmbeddingRecord>>,
    /// Documents persisted without a searchable embedding (ingest failed or
    /// was cancelled at the embed step). Cleared when an embedding lands.
    pending_embedding: HashSet<Uuid>,
}

/// In-process Document Store.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

/// Result of a document insert: either a fresh document or the existing
/// dedup match.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub document: Document,
    pub deduplicated: bool,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, collapsing content-hash duplicates: a second
    /// insert with the same `(kind, hash)` returns the existing document.
    pub fn insert_document(
        &self,
        kind: DocumentKind,
        raw_text: String,
        structured_fields: BTreeMap<String, String>,
        hash: String,
        source: Option<String>,
    ) -> InsertOutcome {
        let mut inner = self.write();

        if let Some(existing_id) = inner.by_hash.get(&(kind, hash.clone())) {
            if let Some(existing) = inner.documents.get(existing_id) {
                return InsertOutcome {
                    document: existing.clone(),
                    deduplicated: true,
                };
            }
        }

        let document = Document {
            id: Uuid::new_v4(),
            kind,
            raw_text,
            structured_fields,
            content_hash: hash.clone(),
            source,
            created_at: Utc::now(),
        };
        inner.by_hash.insert((kind, hash), document.id);
        inner.documents.insert(document.id, document.clone());

        InsertOutcome {
            document,
            deduplicated: false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Document> {
        self.read().documents.get(&id).cloned()
    }

    /// Records a new embedding for a document, superseding any active
    /// record. The prior record is deactivated, never removed or mutated
    /// beyond its `active` flag.
    pub fn put_embedding(
        &self,
        document_id: Uuid,
        vector: Vec<f32>,
        model_version: &str,
    ) -> Result<EmbeddingRecord, CoreError> {
        let mut inner = self.write();

        if !inner.documents.contains_key(&document_id) {
            return Err(CoreError::NotFound(format!(
                "document {document_id} does not exist"
            )));
        }

        let record = EmbeddingRecord {
            document_id,
            vector,
            model_version: model_version.to_string(),
            active: true,
            created_at: Utc::now(),
        };

        let history = inner.embeddings.entry(document_id).or_default();
        for prior in history.iter_mut() {
            prior.active = false;
        }
        history.push(record.clone());
        inner.pending_embedding.remove(&document_id);

        Ok(record)
    }

    /// Flags a document whose embedding failed, so a retry pass can pick
    /// it up.
    pub fn mark_pending_embedding(&self, document_id: Uuid) {
        self.write().pending_embedding.insert(document_id);
    }

    pub fn pending_embedding_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.read().pending_embedding.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn active_embedding(&self, document_id: Uuid) -> Option<EmbeddingRecord> {
        self.read()
            .embeddings
            .get(&document_id)
            .and_then(|history| history.iter().find(|r| r.active).cloned())
    }

    /// All active embeddings paired with their document kind, for index
    /// rebuilds.
    pub fn active_embeddings(&self) -> Vec<(EmbeddingRecord, DocumentKind)> {
        let inner = self.read();
        inner
            .embeddings
            .values()
            .filter_map(|history| history.iter().find(|r| r.active))
            .filter_map(|record| {
                inner
                    .documents
                    .get(&record.document_id)
                    .map(|doc| (record.clone(), doc.kind))
            })
            .collect()
    }

    /// Documents whose active embedding was produced by a model version
    /// other than `current`. Documents with no active embedding at all are
    /// a separate state ([`DocumentStore::unembedded_document_ids`]): they
    /// are unsearchable, not stale.
    pub fn stale_document_ids(&self, current: &str) -> Vec<Uuid> {
        let inner = self.read();
        let mut ids: Vec<Uuid> = inner
            .documents
            .keys()
            .filter(|id| {
                inner
                    .embeddings
                    .get(id)
                    .and_then(|history| history.iter().find(|r| r.active))
                    .is_some_and(|record| record.model_version != current)
            })
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Documents with no active embedding. Covers embed failures flagged
    /// `pending_embedding` and imports that arrived without vectors.
    pub fn unembedded_document_ids(&self) -> Vec<Uuid> {
        let inner = self.read();
        let mut ids: Vec<Uuid> = inner
            .documents
            .keys()
            .filter(|id| {
                !inner
                    .embeddings
                    .get(id)
                    .map(|history| history.iter().any(|r| r.active))
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn document_count(&self) -> usize {
        self.read().documents.len()
    }

    pub fn count_by_kind(&self, kind: DocumentKind) -> usize {
        self.read()
            .documents
            .values()
            .filter(|d| d.kind == kind)
            .count()
    }

    /// Serializes the full store into the documented migration format.
    pub fn export(&self) -> StoreExport {
        let inner = self.read();

        let documents: BTreeMap<String, Document> = inner
            .documents
            .values()
            .map(|doc| (export_key(doc.kind, &doc.content_hash), doc.clone()))
            .collect();

        let embeddings: Vec<EmbeddingRecord> = inner
            .embeddings
            .values()
            .flat_map(|history| history.iter().filter(|r| r.active).cloned())
            .collect();

        let dimension = embeddings.first().map(|r| r.vector.len()).unwrap_or(0);

        StoreExport {
            format_version: EXPORT_FORMAT_VERSION,
            dimension,
            documents,
            embeddings,
        }
    }

    /// Loads an export produced by [`DocumentStore::export`]. Additive:
    /// already-present documents (same kind + hash) are skipped, so import
    /// is idempotent. Embedding vectors are checked against the export's
    /// own dimension tag.
    pub fn import(&self, export: StoreExport) -> Result<ImportSummary, CoreError> {
        if export.format_version != EXPORT_FORMAT_VERSION {
            return Err(CoreError::Validation(format!(
                "unsupported export format version {}",
                export.format_version
            )));
        }
        for record in &export.embeddings {
            if record.vector.len() != export.dimension {
                return Err(CoreError::DimensionMismatch {
                    expected: export.dimension,
                    actual: record.vector.len(),
                });
            }
        }

        let mut inner = self.write();
        let mut summary = ImportSummary::default();
        let mut imported_ids: HashSet<Uuid> = HashSet::new();

        for document in export.documents.into_values() {
            let key = (document.kind, document.content_hash.clone());
            if inner.by_hash.contains_key(&key) {
                summary.documents_skipped += 1;
                continue;
            }
            imported_ids.insert(document.id);
            inner.by_hash.insert(key, document.id);
            inner.documents.insert(document.id, document);
            summary.documents_imported += 1;
        }

        for record in export.embeddings {
            if !imported_ids.contains(&record.document_id) {
                continue;
            }
            inner
                .embeddings
                .entry(record.document_id)
                .or_default()
                .push(record);
            summary.embeddings_imported += 1;
        }

        // Imported documents that arrived without an embedding still need one.
        for id in imported_ids {
            if !inner.embeddings.contains_key(&id) {
                inner.pending_embedding.insert(id);
            }
        }

        Ok(summary)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

const EXPORT_FORMAT_VERSION: u32 = 1;

fn export_key(kind: DocumentKind, hash: &str) -> String {
    format!("{kind}:{hash}")
}

/// Documented export/import format: documents keyed by `<kind>:<sha256>`,
/// embeddings tagged with the vector dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreExport {
    pub format_version: u32,
    pub dimension: usize,
    pub documents: BTreeMap<String, Document>,
    pub embeddings: Vec<EmbeddingRecord>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportSummary {
    pub documents_imported: usize,
    pub documents_skipped: usize,
    pub embeddings_imported: usize,
}
