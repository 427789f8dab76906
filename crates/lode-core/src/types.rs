//! Shared value types passed between the index, search, and distillation stages.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A text passage read from the passage directory.
///
/// The key is derived from the filename and is unique within a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub key: String,
    pub content: String,
    pub source_path: PathBuf,
}

impl Passage {
    pub fn new(key: impl Into<String>, content: impl Into<String>, source_path: PathBuf) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            source_path,
        }
    }
}

/// Per-key metadata recorded in the mapping file when a passage is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMeta {
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A single nearest-neighbor match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub key: String,
    /// Cosine similarity between the query and the passage, in [-1, 1].
    pub score: f32,
    pub source_path: PathBuf,
    pub meta: PassageMeta,
}

/// A retrieved passage distilled against the query that survived the
/// no-information filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationResult {
    pub key: String,
    pub source_path: PathBuf,
    pub score: f32,
    #[serde(rename = "distilled")]
    pub distilled_text: String,
    pub noinfo_similarity: f32,
}
