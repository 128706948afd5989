//! Refinement policies — pluggable, trait-based, mirroring the embedder
//! seam: the orchestrator drives whichever policy `AppState` was built
//! with.
//!
//! Default: `KeywordRefinePolicy` (pure-Rust, deterministic, no network).
//! With an API key configured: `LlmRefinePolicy` via the shared client.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::agent::prompts;
use crate::errors::CoreError;
use crate::llm_client::LlmClient;

/// A retrieval candidate as shown to a policy: id, current score, and a
/// short excerpt of the document text.
#[derive(Debug, Clone)]
pub struct CandidateDoc {
    pub document_id: Uuid,
    pub score: f32,
    pub excerpt: String,
}

/// One explanation produced by the justify step.
#[derive(Debug, Clone)]
pub struct Justification {
    pub document_id: Uuid,
    pub explanation: String,
}

/// The refinement policy contract. Policies are read-only: they see
/// candidate excerpts and return orderings or annotations, never handles
/// to the store or index.
#[async_trait]
pub trait RefinePolicy: Send + Sync {
    /// A short label for logs and traces.
    fn name(&self) -> &str;

    /// Rewrites the query text for a second retrieval pass. Returning the
    /// input unchanged skips the extra retrieval.
    async fn rewrite_query(&self, query_text: &str) -> Result<String, CoreError>;

    /// Returns candidate ids from most to least relevant. Every returned
    /// id must come from `candidates`; unknown ids are malformed output.
    async fn rerank(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Uuid>, CoreError>;

    /// Explains the top candidates. Unknown ids are malformed output.
    async fn justify(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Justification>, CoreError>;
}

// ────────────────────────────────────────────────────────────────────────
// KeywordRefinePolicy — deterministic default
// ────────────────────────────────────────────────────────────────────────

/// Token-overlap refinement. No model call, so agent-enhanced search works
/// out of the box and degrades into something still useful when no API key
/// is configured.
pub struct KeywordRefinePolicy;

impl KeywordRefinePolicy {
    fn query_tokens(query_text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        query_text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    fn matched_tokens(tokens: &[String], excerpt: &str) -> Vec<String> {
        let lower = excerpt.to_lowercase();
        tokens
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RefinePolicy for KeywordRefinePolicy {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn rewrite_query(&self, query_text: &str) -> Result<String, CoreError> {
        // Collapse whitespace and drop repeated tokens; usually a no-op,
        // which makes the rewrite step skip its second retrieval.
        Ok(Self::query_tokens(query_text).join(" "))
    }

    async fn rerank(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Uuid>, CoreError> {
        let tokens = Self::query_tokens(query_text);
        let mut scored: Vec<(usize, usize, Uuid)> = candidates
            .iter()
            .enumerate()
            .map(|(position, c)| {
                (Self::matched_tokens(&tokens, &c.excerpt).len(), position, c.document_id)
            })
            .collect();
        // Overlap descending, original rank as the tiebreak.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(scored.into_iter().map(|(_, _, id)| id).collect())
    }

    async fn justify(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Justification>, CoreError> {
        let tokens = Self::query_tokens(query_text);
        Ok(candidates
            .iter()
            .map(|c| {
                let matched = Self::matched_tokens(&tokens, &c.excerpt);
                let explanation = if matched.is_empty() {
                    "no direct term overlap with the query".to_string()
                } else {
                    format!("matches query terms: {}", matched.join(", "))
                };
                Justification {
                    document_id: c.document_id,
                    explanation,
                }
            })
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────
// LlmRefinePolicy — model-backed refinement
// ────────────────────────────────────────────────────────────────────────

pub struct LlmRefinePolicy {
    llm: LlmClient,
}

impl LlmRefinePolicy {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn render_candidates(candidates: &[CandidateDoc]) -> String {
        candidates
            .iter()
            .map(|c| format!("- id: {} (score {:.3}): {}", c.document_id, c.score, c.excerpt))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Deserialize)]
struct RewriteOut {
    rewritten: String,
}

#[derive(Deserialize)]
struct RerankOut {
    order: Vec<Uuid>,
}

#[derive(Deserialize)]
struct JustifyOut {
    justifications: Vec<JustificationOut>,
}

#[derive(Deserialize)]
struct JustificationOut {
    document_id: Uuid,
    explanation: String,
}

#[async_trait]
impl RefinePolicy for LlmRefinePolicy {
    fn name(&self) -> &str {
        "llm"
    }

    async fn rewrite_query(&self, query_text: &str) -> Result<String, CoreError> {
        let prompt = prompts::REWRITE_PROMPT.replace("{query}", query_text);
        let out: RewriteOut = self
            .llm
            .call_json(&prompt, prompts::REWRITE_SYSTEM)
            .await
            .map_err(|e| CoreError::Llm(format!("rewrite failed: {e}")))?;
        Ok(out.rewritten)
    }

    async fn rerank(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Uuid>, CoreError> {
        let prompt = prompts::RERANK_PROMPT
            .replace("{query}", query_text)
            .replace("{candidates}", &Self::render_candidates(candidates));
        let out: RerankOut = self
            .llm
            .call_json(&prompt, prompts::RERANK_SYSTEM)
            .await
            .map_err(|e| CoreError::Llm(format!("rerank failed: {e}")))?;
        Ok(out.order)
    }

    async fn justify(
        &self,
        query_text: &str,
        candidates: &[CandidateDoc],
    ) -> Result<Vec<Justification>, CoreError> {
        let prompt = prompts::JUSTIFY_PROMPT
            .replace("{query}", query_text)
            .replace("{candidates}", &Self::render_candidates(candidates));
        let out: JustifyOut = self
            .llm
            .call_json(&prompt, prompts::JUSTIFY_SYSTEM)
            .await
            .map_err(|e| CoreError::Llm(format!("justify failed: {e}")))?;
        Ok(out
            .justifications
            .into_iter()
            .map(|j| Justification {
                document_id: j.document_id,
                explanation: j.explanation,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(excerpt: &str) -> CandidateDoc {
        CandidateDoc {
            document_id: Uuid::new_v4(),
            score: 0.5,
            excerpt: excerpt.to_string(),
        }
    }

    #[tokio::test]
    async fn test_keyword_rewrite_dedupes_tokens() {
        let rewritten = KeywordRefinePolicy
            .rewrite_query("rust rust   engineer")
            .await
            .unwrap();
        assert_eq!(rewritten, "rust engineer");
    }

    #[tokio::test]
    async fn test_keyword_rerank_prefers_higher_overlap() {
        let weak = candidate("accountant with spreadsheet experience");
        let strong = candidate("rust engineer, distributed systems");
        let order = KeywordRefinePolicy
            .rerank("rust distributed systems", &[weak.clone(), strong.clone()])
            .await
            .unwrap();
        assert_eq!(order, vec![strong.document_id, weak.document_id]);
    }

    #[tokio::test]
    async fn test_keyword_rerank_is_stable_on_ties() {
        let first = candidate("rust here");
        let second = candidate("rust there");
        let order = KeywordRefinePolicy
            .rerank("rust", &[first.clone(), second.clone()])
            .await
            .unwrap();
        assert_eq!(order, vec![first.document_id, second.document_id]);
    }

    #[tokio::test]
    async fn test_keyword_justify_names_matched_terms() {
        let c = candidate("senior rust engineer");
        let justifications = KeywordRefinePolicy
            .justify("rust engineer", std::slice::from_ref(&c))
            .await
            .unwrap();
        assert_eq!(justifications.len(), 1);
        assert!(justifications[0].explanation.contains("rust"));
        assert!(justifications[0].explanation.contains("engineer"));
    }
}
