use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an ingested document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Resume,
    Job,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Resume => write!(f, "resume"),
            DocumentKind::Job => write!(f, "job"),
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resume" => Ok(DocumentKind::Resume),
            "job" => Ok(DocumentKind::Job),
            other => Err(format!("unknown document kind '{other}'")),
        }
    }
}

/// A source document (resume or job posting) as persisted by the Document
/// Store. Immutable once ingested; re-embedding touches only the embedding
/// records, never this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub kind: DocumentKind,
    pub raw_text: String,
    /// Rule-extracted fields like "skills", "seniority", "title".
    pub structured_fields: BTreeMap<String, String>,
    /// SHA-256 hex of the original upload bytes. Dedup key together with `kind`.
    pub content_hash: String,
    /// Original filename, when the upload carried one.
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One embedding of a document under one model version.
///
/// Append-only: a re-embed inserts a new record and flips `active` off on
/// the superseded one. Records are never mutated in place beyond that flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub document_id: Uuid,
    pub vector: Vec<f32>,
    pub model_version: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        assert_eq!("resume".parse::<DocumentKind>().unwrap(), DocumentKind::Resume);
        assert_eq!("Job".parse::<DocumentKind>().unwrap(), DocumentKind::Job);
        assert_eq!(DocumentKind::Job.to_string(), "job");
    }

    #[test]
    fn test_kind_rejects_unknown() {
        assert!("cover_letter".parse::<DocumentKind>().is_err());
    }

    #[test]
    fn test_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&DocumentKind::Resume).unwrap();
        assert_eq!(json, "\"resume\"");
    }
}
