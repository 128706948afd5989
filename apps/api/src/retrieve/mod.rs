//! Retriever — executes a search query against the index and returns a
//! normalized, filtered, deterministically ordered result.

pub mod handlers;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::StalePolicy;
use crate::embedding::{embed_with_retry, Embedder};
use crate::errors::CoreError;
use crate::index::VectorIndex;
use crate::models::document::Document;
use crate::models::search::{RankedHit, RankedResult, SearchQuery};
use crate::perf::PerfRegistry;
use crate::store::DocumentStore;

/// Upper bound a caller can ask for in one query.
pub const MAX_TOP_K: usize = 100;

/// Over-fetch factor applied when structured filters are present, so the
/// post-filter result can still fill `top_k`.
const FILTER_OVERFETCH: usize = 4;

pub struct Retriever {
    store: Arc<DocumentStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    perf: Arc<PerfRegistry>,
    stale_policy: StalePolicy,
    embed_retry_max: u32,
}

impl Retriever {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        perf: Arc<PerfRegistry>,
        stale_policy: StalePolicy,
        embed_retry_max: u32,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            perf,
            stale_policy,
            embed_retry_max,
        }
    }

    /// Runs a query end to end: embed, stale check, index lookup, score
    /// normalization, structured filtering, top-k truncation.
    ///
    /// Deterministic given identical inputs and index state: hits are
    /// sorted by descending score with ties broken by ascending document
    /// id, and nothing in the scoring path draws randomness.
    pub async fn retrieve(&self, query: &SearchQuery) -> Result<RankedResult, CoreError> {
        validate_query(query)?;
        self.ensure_fresh_index().await?;

        let timer = self.perf.start("retrieve.embed");
        let vector =
            embed_with_retry(self.embedder.as_ref(), &query.text, self.embed_retry_max).await;
        timer.record(vector.is_ok());
        let vector = vector?;

        let fetch = if query.structured_filters.is_empty() {
            query.top_k
        } else {
            query.top_k.saturating_mul(FILTER_OVERFETCH)
        };

        let timer = self.perf.start("retrieve.query");
        let scored = self.index.query(&vector, query.kind_filter, fetch);
        timer.record(scored.is_ok());
        let scored = scored?;

        let timer = self.perf.start("retrieve.rank");
        let mut hits: Vec<RankedHit> = Vec::with_capacity(scored.len());
        for (document_id, raw_score) in scored {
            let Some(document) = self.store.get(document_id) else {
                // Index entry with no backing document: the index is a
                // derived cache, so the store wins and the hit is dropped.
                debug!(%document_id, "index entry without document, skipping");
                continue;
            };
            if !matches_structured_filters(&document, query) {
                continue;
            }
            hits.push(RankedHit {
                document_id,
                score: raw_score.clamp(0.0, 1.0),
                explanation: None,
            });
        }

        // Clamping can merge distinct negative scores into 0, so re-apply
        // the ordering invariant after normalization.
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        hits.truncate(query.top_k);
        timer.record(true);

        Ok(RankedResult::from_hits(hits))
    }

    /// Applies the configured stale-index policy when the store holds
    /// active embeddings from a different model version than the live
    /// embedder. Documents with no embedding at all are not stale: they
    /// stay unsearchable until the retry pass (or, under
    /// `ReembedOnRead`, the next query) embeds them.
    async fn ensure_fresh_index(&self) -> Result<(), CoreError> {
        let current = self.embedder.model_version();
        let stale = self.store.stale_document_ids(current);

        match self.stale_policy {
            StalePolicy::Error => match stale.first() {
                None => Ok(()),
                Some(&id) => {
                    let stored = self
                        .store
                        .active_embedding(id)
                        .map(|r| r.model_version)
                        .unwrap_or_else(|| "unknown".to_string());
                    Err(CoreError::StaleIndex {
                        stored,
                        current: current.to_string(),
                    })
                }
            },
            StalePolicy::ReembedOnRead => {
                let mut ids = stale;
                ids.extend(self.store.unembedded_document_ids());
                if ids.is_empty() {
                    return Ok(());
                }
                let timer = self.perf.start("retrieve.reembed");
                let outcome = self.reembed(&ids).await;
                timer.record(outcome.is_ok());
                outcome
            }
        }
    }

    async fn reembed(&self, ids: &[uuid::Uuid]) -> Result<(), CoreError> {
        info!(count = ids.len(), "re-embedding stale documents on read");
        for &id in ids {
            let Some(document) = self.store.get(id) else {
                continue;
            };
            let vector = embed_with_retry(
                self.embedder.as_ref(),
                &document.raw_text,
                self.embed_retry_max,
            )
            .await?;
            let record =
                self.store
                    .put_embedding(id, vector, self.embedder.model_version())?;
            self.index.upsert(&record, document.kind)?;
        }
        Ok(())
    }
}

fn validate_query(query: &SearchQuery) -> Result<(), CoreError> {
    if query.text.trim().is_empty() {
        return Err(CoreError::Validation("query text must not be empty".to_string()));
    }
    if query.top_k == 0 {
        return Err(CoreError::Validation("top_k must be at least 1".to_string()));
    }
    if query.top_k > MAX_TOP_K {
        return Err(CoreError::Validation(format!(
            "top_k must be at most {MAX_TOP_K}"
        )));
    }
    Ok(())
}

/// A document matches when every named structured field exists and
/// contains the filter value, case-insensitively.
fn matches_structured_filters(document: &Document, query: &SearchQuery) -> bool {
    query.structured_filters.iter().all(|(field, wanted)| {
        document
            .structured_fields
            .get(field)
            .map(|value| value.to_lowercase().contains(&wanted.to_lowercase()))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::embedding::HashingEmbedder;
    use crate::models::document::DocumentKind;
    use crate::store::content_hash;

    struct Fixture {
        store: Arc<DocumentStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<HashingEmbedder>,
    }

    const DIM: usize = 256;

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(DocumentStore::new()),
                index: Arc::new(VectorIndex::new(DIM)),
                embedder: Arc::new(HashingEmbedder::new(DIM)),
            }
        }

        fn retriever(&self, policy: StalePolicy) -> Retriever {
            Retriever::new(
                self.store.clone(),
                self.index.clone(),
                self.embedder.clone(),
                Arc::new(PerfRegistry::new()),
                policy,
                1,
            )
        }

        async fn ingest(
            &self,
            kind: DocumentKind,
            text: &str,
            fields: BTreeMap<String, String>,
        ) -> uuid::Uuid {
            let doc = self
                .store
                .insert_document(
                    kind,
                    text.to_string(),
                    fields,
                    content_hash(text.as_bytes()),
                    None,
                )
                .document;
            let vector = self.embedder.embed(text).await.unwrap();
            let record = self
                .store
                .put_embedding(doc.id, vector, self.embedder.model_version())
                .unwrap();
            self.index.upsert(&record, kind).unwrap();
            doc.id
        }
    }

    #[tokio::test]
    async fn test_matching_resume_ranks_first_with_meaningful_score() {
        let fx = Fixture::new();
        let resume = fx
            .ingest(
                DocumentKind::Resume,
                "Senior backend engineer, distributed systems, Go and Rust",
                BTreeMap::new(),
            )
            .await;
        fx.ingest(
            DocumentKind::Job,
            "Looking for a distributed systems engineer with Rust experience",
            BTreeMap::new(),
        )
        .await;

        let retriever = fx.retriever(StalePolicy::Error);
        let query = SearchQuery::new("Rust distributed systems engineer", 1);
        let result = retriever.retrieve(&query).await.unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].document_id, resume);
        assert!(
            result.hits[0].score > 0.5,
            "expected score > 0.5, got {}",
            result.hits[0].score
        );
    }

    #[tokio::test]
    async fn test_kind_filter_never_leaks_other_kind() {
        let fx = Fixture::new();
        // The resume is a word-for-word match for the query; the job is not.
        fx.ingest(
            DocumentKind::Resume,
            "Rust distributed systems engineer",
            BTreeMap::new(),
        )
        .await;
        let job = fx
            .ingest(DocumentKind::Job, "Looking for an accountant", BTreeMap::new())
            .await;

        let retriever = fx.retriever(StalePolicy::Error);
        let query =
            SearchQuery::new("Rust distributed systems engineer", 10).with_kind(DocumentKind::Job);
        let result = retriever.retrieve(&query).await.unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].document_id, job);
    }

    #[tokio::test]
    async fn test_results_sorted_desc_with_scores_in_unit_interval() {
        let fx = Fixture::new();
        fx.ingest(DocumentKind::Resume, "rust engineer", BTreeMap::new()).await;
        fx.ingest(DocumentKind::Resume, "java developer", BTreeMap::new()).await;
        fx.ingest(DocumentKind::Resume, "rust systems engineer", BTreeMap::new()).await;

        let retriever = fx.retriever(StalePolicy::Error);
        let result = retriever
            .retrieve(&SearchQuery::new("rust engineer", 10))
            .await
            .unwrap();

        assert!(!result.hits.is_empty());
        for pair in result.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for hit in &result.hits {
            assert!((0.0..=1.0).contains(&hit.score));
        }
    }

    #[tokio::test]
    async fn test_structured_filters_exclude_mismatches() {
        let fx = Fixture::new();
        let senior = fx
            .ingest(
                DocumentKind::Resume,
                "rust engineer",
                BTreeMap::from([("seniority".to_string(), "senior".to_string())]),
            )
            .await;
        fx.ingest(
            DocumentKind::Resume,
            "rust engineer with less experience",
            BTreeMap::from([("seniority".to_string(), "junior".to_string())]),
        )
        .await;

        let retriever = fx.retriever(StalePolicy::Error);
        let mut query = SearchQuery::new("rust engineer", 10);
        query
            .structured_filters
            .insert("seniority".to_string(), "senior".to_string());
        let result = retriever.retrieve(&query).await.unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].document_id, senior);
    }

    #[tokio::test]
    async fn test_stale_embeddings_surface_error_by_default() {
        let fx = Fixture::new();
        let doc = fx
            .store
            .insert_document(
                DocumentKind::Resume,
                "rust engineer".to_string(),
                BTreeMap::new(),
                content_hash(b"rust engineer"),
                None,
            )
            .document;
        let vector = fx.embedder.embed("rust engineer").await.unwrap();
        fx.store.put_embedding(doc.id, vector, "old-model-v0").unwrap();

        let retriever = fx.retriever(StalePolicy::Error);
        let err = retriever
            .retrieve(&SearchQuery::new("rust", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StaleIndex { .. }));
    }

    #[tokio::test]
    async fn test_reembed_on_read_recovers_stale_documents() {
        let fx = Fixture::new();
        let doc = fx
            .store
            .insert_document(
                DocumentKind::Resume,
                "rust engineer".to_string(),
                BTreeMap::new(),
                content_hash(b"rust engineer"),
                None,
            )
            .document;
        let vector = fx.embedder.embed("rust engineer").await.unwrap();
        fx.store.put_embedding(doc.id, vector, "old-model-v0").unwrap();

        let retriever = fx.retriever(StalePolicy::ReembedOnRead);
        let result = retriever
            .retrieve(&SearchQuery::new("rust engineer", 5))
            .await
            .unwrap();

        assert_eq!(result.hits[0].document_id, doc.id);
        let active = fx.store.active_embedding(doc.id).unwrap();
        assert_eq!(active.model_version, fx.embedder.model_version());
    }

    #[tokio::test]
    async fn test_pending_document_does_not_fail_other_searches() {
        let fx = Fixture::new();
        let healthy = fx
            .ingest(DocumentKind::Resume, "rust engineer", BTreeMap::new())
            .await;

        // A second upload whose embed step failed: persisted, flagged,
        // unsearchable.
        let pending = fx
            .store
            .insert_document(
                DocumentKind::Resume,
                "go engineer".to_string(),
                BTreeMap::new(),
                content_hash(b"go engineer"),
                None,
            )
            .document;
        fx.store.mark_pending_embedding(pending.id);

        let retriever = fx.retriever(StalePolicy::Error);
        let result = retriever
            .retrieve(&SearchQuery::new("engineer", 10))
            .await
            .unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].document_id, healthy);
        // Still flagged; only the retry pass embeds it under this policy.
        assert_eq!(fx.store.pending_embedding_ids(), vec![pending.id]);
    }

    #[tokio::test]
    async fn test_reembed_on_read_picks_up_pending_document() {
        let fx = Fixture::new();
        let pending = fx
            .store
            .insert_document(
                DocumentKind::Resume,
                "rust engineer".to_string(),
                BTreeMap::new(),
                content_hash(b"rust engineer"),
                None,
            )
            .document;
        fx.store.mark_pending_embedding(pending.id);

        let retriever = fx.retriever(StalePolicy::ReembedOnRead);
        let result = retriever
            .retrieve(&SearchQuery::new("rust engineer", 5))
            .await
            .unwrap();

        assert_eq!(result.hits[0].document_id, pending.id);
        assert!(fx.store.pending_embedding_ids().is_empty());
        assert!(fx.store.active_embedding(pending.id).is_some());
    }

    #[tokio::test]
    async fn test_empty_query_text_rejected() {
        let fx = Fixture::new();
        let retriever = fx.retriever(StalePolicy::Error);
        let err = retriever
            .retrieve(&SearchQuery::new("  ", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let fx = Fixture::new();
        let retriever = fx.retriever(StalePolicy::Error);
        let err = retriever
            .retrieve(&SearchQuery::new("rust", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let fx = Fixture::new();
        fx.ingest(DocumentKind::Resume, "rust engineer", BTreeMap::new()).await;
        fx.ingest(DocumentKind::Resume, "go engineer", BTreeMap::new()).await;

        let retriever = fx.retriever(StalePolicy::Error);
        let query = SearchQuery::new("engineer", 10);
        let first = retriever.retrieve(&query).await.unwrap();
        let second = retriever.retrieve(&query).await.unwrap();
        assert_eq!(first, second);
    }
}
