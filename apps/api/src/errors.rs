use thiserror::Error;

/// Core error taxonomy for the retrieval service.
///
/// Deliberately free of any HTTP type: the transport layer wraps this in
/// `routes::ApiError` and decides status codes there. Core modules return
/// `Result<T, CoreError>` and propagate with `?`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input from the caller. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A backing service (embedder, model endpoint) is temporarily
    /// unavailable. Retried with bounded backoff at the ingestion and
    /// retrieval boundaries.
    #[error("Backend temporarily unavailable: {0}")]
    TransientBackend(String),

    /// Stored embeddings were produced by a different model version than
    /// the configured embedder. Surfaced unless the re-embed-on-read
    /// policy is active.
    #[error("Stale index: stored embeddings use model '{stored}', embedder is '{current}'")]
    StaleIndex { stored: String, current: String },

    /// Vector length does not match the index dimension. Always fatal to
    /// the request; never silently coerced.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("LLM error: {0}")]
    Llm(String),

    /// A refinement step failed. Absorbed inside the agent orchestrator,
    /// which falls back to the base retrieval result. Never reaches a
    /// route handler.
    #[error("Agent refinement aborted: {0}")]
    AgentAborted(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// True for errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::TransientBackend(_))
    }
}
