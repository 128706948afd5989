//! Embedding seam — pluggable, trait-based, the same way the fit scorer
//! seam works elsewhere in the codebase: `AppState` holds an
//! `Arc<dyn Embedder>` picked at startup, and everything downstream is
//! backend-agnostic.
//!
//! Default: `HashingEmbedder`, a deterministic pure-Rust feature-hashing
//! embedder. It needs no model download and no network, which keeps the
//! service runnable and the pipeline fully testable offline. A remote
//! model-backed embedder only has to implement the trait.

use std::hash::Hasher;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use twox_hash::XxHash64;

use crate::errors::CoreError;

/// Produces fixed-dimension vectors for documents and queries. Query and
/// document embeddings must come from the same implementation and
/// `model_version` for scores to be meaningful.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the backing model. Stored on every embedding record;
    /// a mismatch with stored records triggers the stale-index policy.
    fn model_version(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

/// Deterministic feature-hashing embedder: each token is hashed into one of
/// `dim` buckets, counts accumulate, and the vector is L2-normalized. Token
/// overlap between two texts then shows up directly as cosine similarity.
pub struct HashingEmbedder {
    dim: usize,
    version: String,
}

/// Seed for token bucketing. Fixed so vectors are stable across runs and
/// hosts, which the export/import format depends on.
const BUCKET_SEED: u64 = 0x5eed_beef;

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            version: format!("feature-hash-v1/{dim}"),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let mut hasher = XxHash64::with_seed(BUCKET_SEED);
            hasher.write(token.as_bytes());
            let bucket = (hasher.finish() % self.dim as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation("cannot embed empty text".to_string()));
        }
        Ok(self.embed_sync(text))
    }
}

/// Lowercased alphanumeric tokens, everything else is a separator.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Embeds with bounded exponential backoff on transient failures. Used at
/// the ingestion and retrieval boundaries; validation errors are never
/// retried.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    max_attempts: u32,
) -> Result<Vec<f32>, CoreError> {
    let mut last_error = None;

    for attempt in 0..max_attempts.max(1) {
        if attempt > 0 {
            // 100ms, 200ms, 400ms...
            let delay = Duration::from_millis(100 * (1 << (attempt - 1)));
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "transient embedder failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        match embedder.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        CoreError::TransientBackend("embedder unavailable".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let embedder = HashingEmbedder::new(128);
        let a = embedder.embed("Rust distributed systems").await.unwrap();
        let b = embedder.embed("Rust distributed systems").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_embedding_is_unit_norm() {
        let embedder = HashingEmbedder::new(128);
        let v = embedder.embed("senior backend engineer").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_overlapping_texts_score_higher_than_disjoint() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("rust distributed systems").await.unwrap();
        let near = embedder
            .embed("distributed systems engineer with rust experience")
            .await
            .unwrap();
        let far = embedder.embed("pastry chef with cake decorating").await.unwrap();

        assert!(cosine(&query, &near) > cosine(&query, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_a_validation_error() {
        let embedder = HashingEmbedder::new(64);
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_tokenize_lowercases_and_splits_punctuation() {
        let tokens: Vec<String> = tokenize("Go, Rust & C++!").collect();
        assert_eq!(tokens, vec!["go", "rust", "c"]);
    }

    struct FlakyEmbedder {
        failures: AtomicU32,
        inner: HashingEmbedder,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_version(&self) -> &str {
            self.inner.model_version()
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                f.checked_sub(1)
            }).is_ok()
            {
                return Err(CoreError::TransientBackend("flaky".to_string()));
            }
            self.inner.embed(text).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let embedder = FlakyEmbedder {
            failures: AtomicU32::new(2),
            inner: HashingEmbedder::new(32),
        };
        let vector = embed_with_retry(&embedder, "rust", 3).await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let embedder = FlakyEmbedder {
            failures: AtomicU32::new(10),
            inner: HashingEmbedder::new(32),
        };
        let err = embed_with_retry(&embedder, "rust", 3).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let embedder = HashingEmbedder::new(32);
        let err = embed_with_retry(&embedder, "", 3).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
