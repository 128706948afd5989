use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::document::DocumentKind;

/// A search request as the core sees it. Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub kind_filter: Option<DocumentKind>,
    pub top_k: usize,
    /// Field-name → required value. A document matches when each named
    /// structured field contains the value (case-insensitive).
    #[serde(default)]
    pub structured_filters: BTreeMap<String, String>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            kind_filter: None,
            top_k,
            structured_filters: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind_filter = Some(kind);
        self
    }
}

/// One ranked hit. Scores are normalized to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub document_id: Uuid,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Ordered result of a retrieval, best first. Produced fresh per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RankedResult {
    pub hits: Vec<RankedHit>,
    /// Refinement diagnostics; empty unless the agent orchestrator ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceStep>,
}

impl RankedResult {
    pub fn from_hits(hits: Vec<RankedHit>) -> Self {
        Self { hits, trace: Vec::new() }
    }
}

/// Kind of one agent refinement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    RewriteQuery,
    Rerank,
    Justify,
}

/// Outcome of one agent refinement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Aborted,
}

/// One entry of the agent trace. Bounded in count by the configured step
/// budget, so a runaway policy cannot grow the trace without limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: StepKind,
    pub input_summary: String,
    pub output_summary: String,
    pub latency_ms: u64,
    pub outcome: StepOutcome,
}
