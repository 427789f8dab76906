//! Batch ingestion pipeline.
//!
//! Embedding calls fan out to a bounded pool; their results flow back in
//! input order to a single writer that owns the store lock. The first passage
//! of an empty store is embedded alone so that the index dimension is fixed
//! before any concurrent result can race it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use lode_core::config::EmbeddingConfig;
use lode_core::error::{LodeError, Result};
use lode_core::types::Passage;

use crate::embedding::DynEmbeddingService;
use crate::store::{embed_passage, IngestOutcome, SharedStore, VectorStore};

/// Tuning for an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Maximum in-flight embedding calls.
    pub max_concurrency: usize,
    /// Per-call embedding timeout.
    pub timeout: Duration,
    /// Tries for the dimension-fixing first insert before the run aborts.
    pub first_insert_attempts: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for IngestOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            first_insert_attempts: config.first_insert_attempts.max(1),
        }
    }
}

/// Outcome of one passage in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEntry {
    pub key: String,
    pub outcome: IngestOutcome,
}

/// Per-passage outcomes of an ingestion run, in input order for attempted
/// passages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub entries: Vec<IngestEntry>,
}

impl IngestReport {
    fn push(&mut self, key: impl Into<String>, outcome: IngestOutcome) {
        self.entries.push(IngestEntry {
            key: key.into(),
            outcome,
        });
    }

    fn count(&self, pred: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn stored(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Stored { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::RecordedFailure { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Deferred { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Rejected { .. }))
    }

    pub fn outcome_for(&self, key: &str) -> Option<&IngestOutcome> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.outcome)
    }
}

/// Drives a batch of passages into a [`SharedStore`].
pub struct IngestPipeline {
    store: SharedStore,
    embedder: Arc<dyn DynEmbeddingService>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        store: SharedStore,
        embedder: Arc<dyn DynEmbeddingService>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Embed and store a single passage.
    pub async fn ingest_one(&self, passage: &Passage) -> Result<IngestOutcome> {
        if let Some(reason) = self.read_store()?.skip_reason(&passage.key) {
            return Ok(IngestOutcome::Skipped { reason });
        }
        let embedding =
            embed_passage(self.embedder.as_ref(), &passage.content, self.options.timeout).await;
        self.write_store()?.apply(passage, embedding)
    }

    /// Ingest `passages`, isolating provider failures per passage.
    ///
    /// Returns an error only for conditions that must stop the run: a
    /// dimension mismatch, an unreconcilable store, a failed flush, or a
    /// first insert that keeps timing out.
    pub async fn run(&self, passages: Vec<Passage>) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let total = passages.len();

        let mut pending = Vec::with_capacity(total);
        {
            let store = self.read_store()?;
            for passage in passages {
                match store.skip_reason(&passage.key) {
                    Some(reason) => {
                        debug!(key = %passage.key, ?reason, "Skipping passage");
                        report.push(passage.key, IngestOutcome::Skipped { reason });
                    }
                    None => pending.push(passage),
                }
            }
        }

        info!(
            total,
            pending = pending.len(),
            skipped = report.skipped(),
            "Ingestion started"
        );

        let mut pending = pending.into_iter();

        if self.read_store()?.dimension().is_none() {
            for passage in pending.by_ref() {
                let embedding = self.embed_first(&passage).await?;
                let outcome = self.write_store()?.apply(&passage, embedding)?;
                let stored = matches!(outcome, IngestOutcome::Stored { .. });
                report.push(passage.key, outcome);
                if stored {
                    break;
                }
            }
        }

        let embedder = Arc::clone(&self.embedder);
        let timeout = self.options.timeout;
        let mut results = stream::iter(pending)
            .map(move |passage| {
                let embedder = Arc::clone(&embedder);
                async move {
                    let embedding =
                        embed_passage(embedder.as_ref(), &passage.content, timeout).await;
                    (passage, embedding)
                }
            })
            .buffered(self.options.max_concurrency.max(1));

        while let Some((passage, embedding)) = results.next().await {
            let outcome = self.write_store()?.apply(&passage, embedding);
            match outcome {
                Ok(outcome) => {
                    debug!(key = %passage.key, outcome = outcome.label(), "Passage processed");
                    report.push(passage.key, outcome);
                }
                Err(e) => {
                    error!(key = %passage.key, error = %e, "Ingestion aborted");
                    return Err(e);
                }
            }
        }

        info!(
            stored = report.stored(),
            skipped = report.skipped(),
            failed = report.failed(),
            deferred = report.deferred(),
            rejected = report.rejected(),
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Embed the passage that will fix the index dimension.
    ///
    /// Timeouts are retried up to the configured attempt count, after which
    /// the run aborts. Other provider failures are handed back as the
    /// passage's own result.
    async fn embed_first(&self, passage: &Passage) -> Result<Result<Vec<f32>>> {
        let attempts = self.options.first_insert_attempts.max(1);
        let mut attempt = 1;
        loop {
            match embed_passage(self.embedder.as_ref(), &passage.content, self.options.timeout)
                .await
            {
                Err(e @ LodeError::Timeout { .. }) if attempt < attempts => {
                    warn!(key = %passage.key, attempt, error = %e, "First insert timed out; retrying");
                    attempt += 1;
                }
                Err(e @ LodeError::Timeout { .. }) => {
                    error!(key = %passage.key, attempts, "First insert kept timing out");
                    return Err(e);
                }
                other => return Ok(other),
            }
        }
    }

    fn read_store(&self) -> Result<std::sync::RwLockReadGuard<'_, VectorStore>> {
        self.store
            .read()
            .map_err(|e| LodeError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write_store(&self) -> Result<std::sync::RwLockWriteGuard<'_, VectorStore>> {
        self.store
            .write()
            .map_err(|e| LodeError::Storage(format!("Lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::ScriptedEmbedding;
    use crate::store::{SkipReason, StorePaths};

    fn passage(key: &str, content: &str) -> Passage {
        Passage::new(key, content, std::path::PathBuf::from(key))
    }

    fn options() -> IngestOptions {
        IngestOptions {
            max_concurrency: 4,
            timeout: Duration::from_secs(5),
            first_insert_attempts: 3,
        }
    }

    fn pipeline(
        dir: &std::path::Path,
        embedder: Arc<ScriptedEmbedding>,
        options: IngestOptions,
    ) -> IngestPipeline {
        let store = VectorStore::open(StorePaths::in_dir(dir)).unwrap().into_shared();
        IngestPipeline::new(store, embedder, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("seed", vec![1.0, 0.0])
                .with_vector("slow", vec![0.0, 1.0])
                .with_vector("fast", vec![1.0, 1.0])
                .with_delay("slow", Duration::from_millis(500)),
        );
        let pipeline = pipeline(dir.path(), embedder.clone(), options());

        let report = pipeline
            .run(vec![
                passage("s.txt", "seed"),
                passage("slow.txt", "slow"),
                passage("fast.txt", "fast"),
            ])
            .await
            .unwrap();

        assert_eq!(report.stored(), 3);
        let store = pipeline.store().read().unwrap();
        assert_eq!(store.mapping().keys, vec!["s.txt", "slow.txt", "fast.txt"]);
        assert_eq!(store.index_len(), 3);
    }

    #[tokio::test]
    async fn test_run_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("good one", vec![1.0, 0.0])
                .with_vector("good two", vec![0.0, 1.0])
                .with_failure("bad", false),
        );
        let pipeline = pipeline(dir.path(), embedder, options());

        let report = pipeline
            .run(vec![
                passage("a.txt", "good one"),
                passage("b.txt", "bad"),
                passage("c.txt", "good two"),
            ])
            .await
            .unwrap();

        assert_eq!(report.stored(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome_for("b.txt"),
            Some(IngestOutcome::RecordedFailure { .. })
        ));
        assert_eq!(
            pipeline.store().read().unwrap().skip_reason("b.txt"),
            Some(SkipReason::PreviouslyFailed)
        );
    }

    #[tokio::test]
    async fn test_failed_first_passage_does_not_block_seeding() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_failure("bad", false)
                .with_vector("good", vec![0.0, 0.0, 1.0]),
        );
        let pipeline = pipeline(dir.path(), embedder, options());

        let report = pipeline
            .run(vec![passage("a.txt", "bad"), passage("b.txt", "good")])
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.stored(), 1);
        assert_eq!(pipeline.store().read().unwrap().dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("one", vec![1.0, 0.0])
                .with_failure("bad", false),
        );
        let batch = vec![passage("a.txt", "one"), passage("b.txt", "bad")];

        pipeline(dir.path(), embedder.clone(), options())
            .run(batch.clone())
            .await
            .unwrap();
        let calls_after_first = embedder.calls();

        let report = pipeline(dir.path(), embedder.clone(), options())
            .run(batch)
            .await
            .unwrap();

        assert_eq!(report.skipped(), 2);
        assert_eq!(embedder.calls(), calls_after_first);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("two", vec![1.0, 0.0])
                .with_vector("three", vec![1.0, 0.0, 0.0])
                .with_vector("later", vec![0.0, 1.0]),
        );
        let pipeline = pipeline(dir.path(), embedder, options());

        let err = pipeline
            .run(vec![
                passage("a.txt", "two"),
                passage("b.txt", "three"),
                passage("c.txt", "later"),
            ])
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        let store = pipeline.store().read().unwrap();
        assert_eq!(store.mapping().keys, vec!["a.txt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_insert_timeouts_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("stuck", vec![1.0, 0.0])
                .with_delay("stuck", Duration::from_secs(60)),
        );
        let opts = IngestOptions {
            timeout: Duration::from_secs(1),
            ..options()
        };
        let pipeline = pipeline(dir.path(), embedder.clone(), opts);

        let err = pipeline
            .run(vec![passage("a.txt", "stuck")])
            .await
            .unwrap_err();

        assert!(matches!(err, LodeError::Timeout { .. }));
        assert_eq!(embedder.calls_for("stuck"), 3);
        assert!(pipeline.store().read().unwrap().error_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_timeouts_are_recorded_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            ScriptedEmbedding::new()
                .with_vector("seed", vec![1.0, 0.0])
                .with_vector("stuck", vec![0.0, 1.0])
                .with_delay("stuck", Duration::from_secs(60)),
        );
        let opts = IngestOptions {
            timeout: Duration::from_secs(1),
            ..options()
        };
        let pipeline = pipeline(dir.path(), embedder, opts);

        let report = pipeline
            .run(vec![passage("a.txt", "seed"), passage("b.txt", "stuck")])
            .await
            .unwrap();

        assert_eq!(report.stored(), 1);
        assert!(matches!(
            report.outcome_for("b.txt"),
            Some(IngestOutcome::RecordedFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Arc::new(ScriptedEmbedding::new()), options());
        let report = pipeline.run(Vec::new()).await.unwrap();
        assert!(report.entries.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_one() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(ScriptedEmbedding::new().with_vector("one", vec![1.0]));
        let pipeline = pipeline(dir.path(), embedder, options());
        let p = passage("a.txt", "one");

        assert_eq!(
            pipeline.ingest_one(&p).await.unwrap(),
            IngestOutcome::Stored { position: 0 }
        );
        assert_eq!(
            pipeline.ingest_one(&p).await.unwrap(),
            IngestOutcome::Skipped {
                reason: SkipReason::AlreadyIndexed
            }
        );
    }
}
