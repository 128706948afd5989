mod agent;
mod config;
mod embedding;
mod errors;
mod index;
mod ingest;
mod llm_client;
mod models;
mod perf;
mod retrieve;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::policy::{KeywordRefinePolicy, LlmRefinePolicy, RefinePolicy};
use crate::agent::AgentOrchestrator;
use crate::config::Config;
use crate::embedding::{Embedder, HashingEmbedder};
use crate::index::VectorIndex;
use crate::ingest::IngestPipeline;
use crate::llm_client::LlmClient;
use crate::perf::PerfRegistry;
use crate::retrieve::Retriever;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::DocumentStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting matchd API v{}", env!("CARGO_PKG_VERSION"));

    let perf = Arc::new(PerfRegistry::new());
    let store = Arc::new(DocumentStore::new());
    let index = Arc::new(VectorIndex::new(config.embedding_dim));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dim));
    info!(
        "Embedder initialized (model: {}, dim: {})",
        embedder.model_version(),
        embedder.dimension()
    );

    let ingest = Arc::new(IngestPipeline::new(
        store.clone(),
        index.clone(),
        embedder.clone(),
        perf.clone(),
        config.max_upload_bytes,
        config.embed_retry_max,
    ));

    let retriever = Arc::new(Retriever::new(
        store.clone(),
        index.clone(),
        embedder.clone(),
        perf.clone(),
        config.stale_policy,
        config.embed_retry_max,
    ));

    // Refinement policy: keyword by default, LLM-backed when a key is set
    let policy: Arc<dyn RefinePolicy> = match &config.anthropic_api_key {
        Some(key) => {
            info!("LLM refinement policy enabled (model: {})", llm_client::MODEL);
            Arc::new(LlmRefinePolicy::new(LlmClient::new(key.clone())))
        }
        None => {
            info!("No API key configured; using keyword refinement policy");
            Arc::new(KeywordRefinePolicy)
        }
    };

    let agent = Arc::new(AgentOrchestrator::new(
        retriever.clone(),
        store.clone(),
        policy,
        perf.clone(),
        config.agent_step_budget,
        Duration::from_secs(config.agent_step_timeout_secs),
    ));

    let state = AppState {
        config: config.clone(),
        store,
        index,
        embedder,
        ingest,
        retriever,
        agent,
        perf,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
