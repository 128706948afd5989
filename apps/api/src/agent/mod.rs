//! Agent orchestrator — bounded, fail-safe refinement of retrieval
//! results.
//!
//! An explicit state machine (`Init → RewriteQuery → Rerank → Justify →
//! Done`, any step may jump to `Aborted`) rather than nested callbacks:
//! the step budget and per-step timeout are the backpressure mechanism,
//! and every transition appends one trace entry. On any failure the
//! orchestrator returns the base result unchanged — a broken policy can
//! cost latency, never correctness. The orchestrator is read-only over
//! the store and index.

pub mod handlers;
pub mod policy;
pub mod prompts;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::search::{RankedHit, RankedResult, SearchQuery, StepKind, StepOutcome, TraceStep};
use crate::perf::PerfRegistry;
use crate::retrieve::Retriever;
use crate::store::DocumentStore;
use policy::{CandidateDoc, RefinePolicy};

/// Characters of document text shown to a policy per candidate.
const EXCERPT_CHARS: usize = 240;
/// Candidates passed to the justify step.
const JUSTIFY_TOP: usize = 3;

pub struct AgentOrchestrator {
    retriever: Arc<Retriever>,
    store: Arc<DocumentStore>,
    policy: Arc<dyn RefinePolicy>,
    perf: Arc<PerfRegistry>,
    step_budget: u32,
    step_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        store: Arc<DocumentStore>,
        policy: Arc<dyn RefinePolicy>,
        perf: Arc<PerfRegistry>,
        step_budget: u32,
        step_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            store,
            policy,
            perf,
            step_budget,
            step_timeout,
        }
    }

    /// Refines `base` for `query`. Infallible by contract: any step
    /// failure degrades to the base result, with the trace recording how
    /// far refinement got.
    pub async fn refine(&self, query: &SearchQuery, base: RankedResult) -> RankedResult {
        let timer = self.perf.start("agent.refine");
        let mut trace = Vec::new();
        let mut hits = base.hits.clone();

        for step in [StepKind::RewriteQuery, StepKind::Rerank, StepKind::Justify] {
            if trace.len() as u32 >= self.step_budget {
                trace.push(abort_entry(step, "step budget exhausted"));
                timer.record(false);
                return aborted(base, trace);
            }

            let started = Instant::now();
            let run = self.run_step(step, query, &mut hits);
            match tokio::time::timeout(self.step_timeout, run).await {
                Ok(Ok(entry)) => {
                    trace.push(TraceStep {
                        latency_ms: started.elapsed().as_millis() as u64,
                        ..entry
                    });
                }
                Ok(Err(e)) => {
                    warn!(policy = self.policy.name(), step = ?step, error = %e, "refinement step failed");
                    trace.push(abort_entry(step, &e.to_string()));
                    timer.record(false);
                    return aborted(base, trace);
                }
                Err(_) => {
                    warn!(policy = self.policy.name(), step = ?step, "refinement step timed out");
                    trace.push(abort_entry(step, "step timed out"));
                    timer.record(false);
                    return aborted(base, trace);
                }
            }
        }

        debug!(policy = self.policy.name(), steps = trace.len(), "refinement complete");
        timer.record(true);
        RankedResult { hits, trace }
    }

    async fn run_step(
        &self,
        step: StepKind,
        query: &SearchQuery,
        hits: &mut Vec<RankedHit>,
    ) -> Result<TraceStep, CoreError> {
        match step {
            StepKind::RewriteQuery => self.step_rewrite(query, hits).await,
            StepKind::Rerank => self.step_rerank(query, hits).await,
            StepKind::Justify => self.step_justify(query, hits).await,
        }
    }

    /// Asks the policy for a rewritten query; when it differs, retrieves
    /// again and merges both candidate sets, keeping the better score per
    /// document.
    async fn step_rewrite(
        &self,
        query: &SearchQuery,
        hits: &mut Vec<RankedHit>,
    ) -> Result<TraceStep, CoreError> {
        let rewritten = self.policy.rewrite_query(&query.text).await?;

        let output = if normalized(&rewritten) == normalized(&query.text) {
            "query unchanged, retrieval skipped".to_string()
        } else {
            let mut second = query.clone();
            second.text = rewritten.clone();
            let extra = self.retriever.retrieve(&second).await?;

            for hit in extra.hits {
                match hits.iter_mut().find(|h| h.document_id == hit.document_id) {
                    Some(existing) => existing.score = existing.score.max(hit.score),
                    None => hits.push(hit),
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.document_id.cmp(&b.document_id))
            });
            hits.truncate(query.top_k);
            format!("rewrote to '{rewritten}', merged candidates")
        };

        Ok(TraceStep {
            step: StepKind::RewriteQuery,
            input_summary: summarize(&query.text),
            output_summary: output,
            latency_ms: 0,
            outcome: StepOutcome::Ok,
        })
    }

    /// Reorders the current candidates per the policy. The returned ids
    /// must form a permutation of a subset of the candidate set; anything
    /// else is malformed output and aborts the refinement. Scores are
    /// rank-normalized so the descending-score invariant holds after the
    /// reorder.
    async fn step_rerank(
        &self,
        query: &SearchQuery,
        hits: &mut Vec<RankedHit>,
    ) -> Result<TraceStep, CoreError> {
        if hits.is_empty() {
            return Ok(TraceStep {
                step: StepKind::Rerank,
                input_summary: "0 candidates".to_string(),
                output_summary: "nothing to rerank".to_string(),
                latency_ms: 0,
                outcome: StepOutcome::Ok,
            });
        }

        let candidates = self.candidates(hits);
        let order = self.policy.rerank(&query.text, &candidates).await?;

        let mut seen = std::collections::HashSet::new();
        for id in &order {
            if !hits.iter().any(|h| h.document_id == *id) || !seen.insert(*id) {
                return Err(CoreError::AgentAborted(format!(
                    "rerank returned id {id} outside the candidate set"
                )));
            }
        }

        let mut reordered: Vec<RankedHit> = Vec::with_capacity(hits.len());
        for id in &order {
            if let Some(hit) = hits.iter().find(|h| h.document_id == *id) {
                reordered.push(hit.clone());
            }
        }
        // Ids the policy left out keep their relative order at the tail.
        for hit in hits.iter() {
            if !seen.contains(&hit.document_id) {
                reordered.push(hit.clone());
            }
        }

        let n = reordered.len() as f32;
        for (i, hit) in reordered.iter_mut().enumerate() {
            hit.score = (n - i as f32) / n;
        }
        *hits = reordered;

        Ok(TraceStep {
            step: StepKind::Rerank,
            input_summary: format!("{} candidates", candidates.len()),
            output_summary: format!("reordered {} candidates", order.len()),
            latency_ms: 0,
            outcome: StepOutcome::Ok,
        })
    }

    /// Attaches one-line explanations to the top candidates.
    async fn step_justify(
        &self,
        query: &SearchQuery,
        hits: &mut Vec<RankedHit>,
    ) -> Result<TraceStep, CoreError> {
        let top = hits.len().min(JUSTIFY_TOP);
        if top == 0 {
            return Ok(TraceStep {
                step: StepKind::Justify,
                input_summary: "0 candidates".to_string(),
                output_summary: "nothing to justify".to_string(),
                latency_ms: 0,
                outcome: StepOutcome::Ok,
            });
        }

        let candidates = self.candidates(&hits[..top]);
        let justifications = self.policy.justify(&query.text, &candidates).await?;

        let mut attached = 0;
        for justification in justifications {
            let Some(hit) = hits
                .iter_mut()
                .find(|h| h.document_id == justification.document_id)
            else {
                return Err(CoreError::AgentAborted(format!(
                    "justify returned id {} outside the candidate set",
                    justification.document_id
                )));
            };
            hit.explanation = Some(justification.explanation);
            attached += 1;
        }

        Ok(TraceStep {
            step: StepKind::Justify,
            input_summary: format!("top {top} candidates"),
            output_summary: format!("justified {attached} candidates"),
            latency_ms: 0,
            outcome: StepOutcome::Ok,
        })
    }

    fn candidates(&self, hits: &[RankedHit]) -> Vec<CandidateDoc> {
        hits.iter()
            .map(|hit| CandidateDoc {
                document_id: hit.document_id,
                score: hit.score,
                excerpt: self
                    .store
                    .get(hit.document_id)
                    .map(|d| excerpt(&d.raw_text))
                    .unwrap_or_default(),
            })
            .collect()
    }
}

fn aborted(base: RankedResult, trace: Vec<TraceStep>) -> RankedResult {
    RankedResult {
        hits: base.hits,
        trace,
    }
}

fn abort_entry(step: StepKind, reason: &str) -> TraceStep {
    TraceStep {
        step,
        input_summary: String::new(),
        output_summary: reason.to_string(),
        latency_ms: 0,
        outcome: StepOutcome::Aborted,
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

fn summarize(text: &str) -> String {
    let mut s: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        s.push('…');
    }
    s
}

fn normalized(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
