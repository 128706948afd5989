use anyhow::{Context, Result};

/// How the retriever reacts when stored embeddings were produced by a
/// different model version than the configured embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Surface `CoreError::StaleIndex` to the caller.
    Error,
    /// Re-embed stale documents with the current model before querying.
    ReembedOnRead,
}

/// Application configuration loaded from environment variables.
/// Everything has a default except the Anthropic key, which is optional:
/// without it the agent falls back to the deterministic keyword policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_prefix: String,
    pub rust_log: String,
    pub anthropic_api_key: Option<String>,
    /// Dimension of the vector index and the default hashing embedder.
    pub embedding_dim: usize,
    pub max_upload_bytes: usize,
    /// Maximum refinement steps per agent-enhanced search.
    pub agent_step_budget: u32,
    pub agent_step_timeout_secs: u64,
    pub stale_policy: StalePolicy,
    /// Retry attempts for transient embedder failures.
    pub embed_retry_max: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            api_prefix: normalize_prefix(
                &std::env::var("API_PREFIX").unwrap_or_else(|_| "/api/v1".to_string()),
            )?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
            embedding_dim: parse_env("EMBEDDING_DIM", 256)?,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
            agent_step_budget: parse_env("AGENT_STEP_BUDGET", 3)?,
            agent_step_timeout_secs: parse_env("AGENT_STEP_TIMEOUT_SECS", 20)?,
            stale_policy: parse_stale_policy()?,
            embed_retry_max: parse_env("EMBED_RETRY_MAX", 3)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}

/// Normalizes the API prefix into the form the router's `nest` accepts:
/// exactly one leading slash, no trailing slash. Router nesting rejects
/// anything else at startup, so catch it here as a config error instead.
fn normalize_prefix(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        anyhow::bail!("API_PREFIX must contain at least one path segment, got '{raw}'");
    }
    Ok(format!("/{trimmed}"))
}

fn parse_stale_policy() -> Result<StalePolicy> {
    match std::env::var("STALE_INDEX_POLICY").as_deref() {
        Err(_) | Ok("error") => Ok(StalePolicy::Error),
        Ok("reembed") => Ok(StalePolicy::ReembedOnRead),
        Ok(other) => anyhow::bail!("STALE_INDEX_POLICY must be 'error' or 'reembed', got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_missing_leading_slash_is_normalized() {
        assert_eq!(normalize_prefix("api/v1").unwrap(), "/api/v1");
    }

    #[test]
    fn test_prefix_trailing_slash_is_stripped() {
        assert_eq!(normalize_prefix("/api/v1/").unwrap(), "/api/v1");
    }

    #[test]
    fn test_well_formed_prefix_passes_through() {
        assert_eq!(normalize_prefix("/api/v1").unwrap(), "/api/v1");
    }

    #[test]
    fn test_root_or_empty_prefix_rejected() {
        assert!(normalize_prefix("/").is_err());
        assert!(normalize_prefix("").is_err());
        assert!(normalize_prefix("  ").is_err());
    }
}
