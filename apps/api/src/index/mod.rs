//! Vector index — derived, rebuildable nearest-neighbor cache over the
//! Document Store's active embeddings.
//!
//! Snapshot discipline: readers clone an `Arc` to the current snapshot and
//! scan it lock-free; writers copy the snapshot, mutate the copy, and swap
//! the `Arc` under a short write lock. A query therefore observes either
//! the pre- or post-update state for any document, never a torn one, and
//! a rebuild swaps in atomically while in-flight queries finish against
//! the old snapshot.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::document::{DocumentKind, EmbeddingRecord};
use crate::store::DocumentStore;

#[derive(Debug, Clone)]
struct IndexEntry {
    kind: DocumentKind,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: HashMap<Uuid, IndexEntry>,
}

/// In-process cosine-similarity index.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces the entry for the embedding's document.
    pub fn upsert(&self, record: &EmbeddingRecord, kind: DocumentKind) -> Result<(), CoreError> {
        self.check_dimension(record.vector.len())?;

        let mut guard = self.write();
        let mut next = (**guard).entries.clone();
        next.insert(
            record.document_id,
            IndexEntry {
                kind,
                vector: record.vector.clone(),
            },
        );
        *guard = Arc::new(Snapshot { entries: next });
        Ok(())
    }

    /// Removes a document from the index. A no-op when absent.
    pub fn remove(&self, document_id: Uuid) {
        let mut guard = self.write();
        if !guard.entries.contains_key(&document_id) {
            return;
        }
        let mut next = (**guard).entries.clone();
        next.remove(&document_id);
        *guard = Arc::new(Snapshot { entries: next });
    }

    /// Nearest-neighbor query. Returns up to `top_k` `(document_id, score)`
    /// pairs sorted by descending cosine score, ties broken by ascending
    /// document id. `kind_filter` excludes documents before scoring.
    pub fn query(
        &self,
        vector: &[f32],
        kind_filter: Option<DocumentKind>,
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>, CoreError> {
        self.check_dimension(vector.len())?;

        let snapshot = self.current();
        let mut scored: Vec<(Uuid, f32)> = snapshot
            .entries
            .iter()
            .filter(|(_, entry)| kind_filter.map_or(true, |k| entry.kind == k))
            .map(|(id, entry)| (*id, cosine_similarity(vector, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Rebuilds the index from the store's active embeddings and swaps the
    /// new snapshot in atomically. Idempotent; safe to run while queries
    /// continue against the old snapshot.
    pub fn rebuild_from(&self, store: &DocumentStore) -> Result<usize, CoreError> {
        let mut entries = HashMap::new();
        for (record, kind) in store.active_embeddings() {
            self.check_dimension(record.vector.len())?;
            entries.insert(
                record.document_id,
                IndexEntry {
                    kind,
                    vector: record.vector,
                },
            );
        }

        let size = entries.len();
        *self.write() = Arc::new(Snapshot { entries });
        Ok(size)
    }

    fn check_dimension(&self, actual: usize) -> Result<(), CoreError> {
        if actual != self.dimension {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<Snapshot>> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
