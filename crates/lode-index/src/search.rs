//! Search engine combining query embedding with flat-index lookup.
//!
//! `SearchEngine` embeds the query, normalizes it, and ranks stored passages
//! by inner product under a shared read lock.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lode_core::error::{LodeError, Result};
use lode_core::types::RetrievalHit;

use crate::embedding::{embed_with_timeout, DynEmbeddingService, EmbeddingService};
use crate::flat::normalize_with_epsilon;
use crate::store::SharedStore;

/// Whether a search produced hits, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Found,
    /// The index is built but nothing could be returned.
    NoMatches,
    /// No passage has been indexed yet.
    NotBuilt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub hits: Vec<RetrievalHit>,
}

impl SearchResponse {
    fn not_built() -> Self {
        Self {
            status: SearchStatus::NotBuilt,
            hits: Vec::new(),
        }
    }

    fn from_hits(hits: Vec<RetrievalHit>) -> Self {
        let status = if hits.is_empty() {
            SearchStatus::NoMatches
        } else {
            SearchStatus::Found
        };
        Self { status, hits }
    }
}

/// Top-k similarity search over a [`SharedStore`].
///
/// Uses dynamic dispatch (`Arc<dyn DynEmbeddingService>`) so that the same
/// embedder can be shared with an ingestion or distillation pipeline.
pub struct SearchEngine {
    store: SharedStore,
    embedder: Arc<dyn DynEmbeddingService>,
    timeout: Duration,
}

impl SearchEngine {
    /// Create a search engine from a concrete embedding service.
    pub fn new(
        store: SharedStore,
        embedder: impl EmbeddingService + 'static,
        timeout: Duration,
    ) -> Self {
        Self::new_dyn(store, Arc::new(embedder), timeout)
    }

    /// Create a search engine from a shared dynamic embedding service.
    pub fn new_dyn(
        store: SharedStore,
        embedder: Arc<dyn DynEmbeddingService>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            timeout,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn DynEmbeddingService> {
        &self.embedder
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return up to `k` stored passages ranked by similarity to `query`.
    ///
    /// An empty store answers `NotBuilt` without calling the embedder.
    /// Embedding failures are returned as errors.
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchResponse> {
        if k == 0 {
            return Err(LodeError::Validation("k must be at least 1".to_string()));
        }
        if self.is_empty()? {
            debug!("Search against an empty store");
            return Ok(SearchResponse::not_built());
        }

        let mut query_vec = embed_with_timeout(self.embedder.as_ref(), query, self.timeout).await?;
        if query_vec.is_empty() {
            return Err(LodeError::provider("provider returned an empty query embedding"));
        }
        normalize_with_epsilon(&mut query_vec);

        let hits = self
            .store
            .read()
            .map_err(|e| LodeError::Storage(format!("Lock poisoned: {}", e)))?
            .search(&query_vec, k)?;

        info!(k, hits = hits.len(), "Search complete");
        Ok(SearchResponse::from_hits(hits))
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self
            .store
            .read()
            .map_err(|e| LodeError::Storage(format!("Lock poisoned: {}", e)))?
            .is_empty())
    }
}
