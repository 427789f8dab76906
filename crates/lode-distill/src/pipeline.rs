//! Retrieve-then-distill pipeline with a two-layer no-information filter.
//!
//! Each hit is read from disk, distilled against the query, and compared to
//! the canonical no-information phrase: first textually, then by embedding
//! similarity. Hits are processed concurrently up to a bound, and results
//! come back in ranking order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use lode_core::config::LodeConfig;
use lode_core::error::{LodeError, Result};
use lode_core::types::{DistillationResult, RetrievalHit};
use lode_index::embedding::embed_with_timeout;
use lode_index::flat::{dot, normalize_with_epsilon};
use lode_index::{SearchEngine, SearchStatus};

use crate::noinfo::NoInfoMatcher;
use crate::provider::DistillationProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistillOptions {
    /// Maximum hits processed at once.
    pub max_concurrency: usize,
    /// Per-call distillation timeout.
    pub distill_timeout: Duration,
}

impl Default for DistillOptions {
    fn default() -> Self {
        Self::from(&LodeConfig::default())
    }
}

impl From<&LodeConfig> for DistillOptions {
    fn from(config: &LodeConfig) -> Self {
        Self {
            max_concurrency: config.distill.max_concurrency.max(1),
            distill_timeout: Duration::from_secs(config.distill.timeout_secs),
        }
    }
}

/// Outcome of a distillation call, including the search status so callers
/// can tell "not built yet" from "nothing survived the filter".
#[derive(Debug, Clone, PartialEq)]
pub struct DistillResponse {
    pub status: SearchStatus,
    pub results: Vec<DistillationResult>,
}

pub struct DistillPipeline {
    search: SearchEngine,
    distiller: Arc<dyn DistillationProvider>,
    matcher: NoInfoMatcher,
    options: DistillOptions,
}

impl DistillPipeline {
    pub fn new(
        search: SearchEngine,
        distiller: Arc<dyn DistillationProvider>,
        matcher: NoInfoMatcher,
        options: DistillOptions,
    ) -> Self {
        Self {
            search,
            distiller,
            matcher,
            options,
        }
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    /// Search for `query` and return the distilled hits that are not judged
    /// equivalent to "no relevant information" at `threshold`.
    pub async fn retrieve_and_distill(
        &self,
        query: &str,
        k: usize,
        threshold: f64,
    ) -> Result<Vec<DistillationResult>> {
        Ok(self.run(query, k, threshold).await?.results)
    }

    /// Like [`DistillPipeline::retrieve_and_distill`], also reporting the
    /// search status.
    pub async fn run(&self, query: &str, k: usize, threshold: f64) -> Result<DistillResponse> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LodeError::Validation(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let response = self.search.search(query, k).await?;
        if response.hits.is_empty() {
            return Ok(DistillResponse {
                status: response.status,
                results: Vec::new(),
            });
        }

        let reference = self.reference_embedding().await;
        let reference = reference.as_deref();

        let candidates: Vec<DistillationResult> = stream::iter(response.hits)
            .map(|hit| self.distill_hit(query, hit, reference))
            .buffered(self.options.max_concurrency.max(1))
            .filter_map(|candidate| async move { candidate })
            .collect()
            .await;

        let attempted = candidates.len();
        let results = apply_threshold(candidates, threshold);
        info!(
            kept = results.len(),
            filtered = attempted - results.len(),
            threshold,
            "Distillation complete"
        );

        Ok(DistillResponse {
            status: response.status,
            results,
        })
    }

    /// Normalized embedding of the canonical phrase, or `None` to disable the
    /// similarity layer for this call.
    async fn reference_embedding(&self) -> Option<Vec<f32>> {
        match embed_with_timeout(
            self.search.embedder().as_ref(),
            self.matcher.phrase(),
            self.search.timeout(),
        )
        .await
        {
            Ok(mut vector) if !vector.is_empty() => {
                normalize_with_epsilon(&mut vector);
                Some(vector)
            }
            Ok(_) => {
                warn!("No-information phrase embedded to an empty vector; similarity filter disabled");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to embed no-information phrase; similarity filter disabled");
                None
            }
        }
    }

    /// Distill one hit. Returns `None` when the hit must be skipped.
    async fn distill_hit(
        &self,
        query: &str,
        hit: RetrievalHit,
        reference: Option<&[f32]>,
    ) -> Option<DistillationResult> {
        let content = match tokio::fs::read_to_string(&hit.source_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    key = %hit.key,
                    path = %hit.source_path.display(),
                    error = %e,
                    "Passage content unavailable; skipping"
                );
                return None;
            }
        };

        let distilled = match tokio::time::timeout(
            self.options.distill_timeout,
            self.distiller.distill(query, &content),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(key = %hit.key, error = %e, "Distillation failed; skipping");
                return None;
            }
            Err(_) => {
                warn!(
                    key = %hit.key,
                    secs = self.options.distill_timeout.as_secs(),
                    "Distillation timed out; skipping"
                );
                return None;
            }
        };

        let noinfo_similarity = if self.matcher.is_exact(&distilled) {
            1.0
        } else {
            self.similarity_to_reference(&distilled, reference).await
        };
        debug!(key = %hit.key, noinfo_similarity, "Distilled");

        Some(DistillationResult {
            key: hit.key,
            source_path: hit.source_path,
            score: hit.score,
            distilled_text: distilled,
            noinfo_similarity,
        })
    }

    async fn similarity_to_reference(&self, text: &str, reference: Option<&[f32]>) -> f32 {
        let Some(reference) = reference else {
            return 0.0;
        };
        match embed_with_timeout(self.search.embedder().as_ref(), text, self.search.timeout()).await
        {
            Ok(mut vector) if vector.len() == reference.len() => {
                normalize_with_epsilon(&mut vector);
                dot(&vector, reference)
            }
            Ok(vector) => {
                warn!(
                    expected = reference.len(),
                    actual = vector.len(),
                    "Distilled text embedding has unexpected dimension"
                );
                0.0
            }
            Err(e) => {
                warn!(error = %e, "Failed to embed distilled text");
                0.0
            }
        }
    }
}

/// Drop every result whose no-information similarity reaches `threshold`,
/// keeping the order of the rest.
///
/// Similarities are `f32`, so the threshold is narrowed to `f32` before the
/// comparison. A similarity equal to the configured threshold is dropped.
pub fn apply_threshold(
    candidates: Vec<DistillationResult>,
    threshold: f64,
) -> Vec<DistillationResult> {
    let threshold = threshold as f32;
    candidates
        .into_iter()
        .filter(|candidate| {
            let keep = candidate.noinfo_similarity < threshold;
            if !keep {
                info!(
                    key = %candidate.key,
                    noinfo_similarity = candidate.noinfo_similarity,
                    "Filtered as no information"
                );
            }
            keep
        })
        .collect()
}
