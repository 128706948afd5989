use std::sync::Arc;

use crate::agent::AgentOrchestrator;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::ingest::IngestPipeline;
use crate::perf::PerfRegistry;
use crate::retrieve::Retriever;
use crate::store::DocumentStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<DocumentStore>,
    pub index: Arc<VectorIndex>,
    /// Pluggable embedder. Default: the deterministic hashing embedder.
    pub embedder: Arc<dyn Embedder>,
    pub ingest: Arc<IngestPipeline>,
    pub retriever: Arc<Retriever>,
    pub agent: Arc<AgentOrchestrator>,
    pub perf: Arc<PerfRegistry>,
}
