//! Durable vector store: the flat index, its key mapping, and the error log.
//!
//! The store is the only writer of the index/mapping pair. Every successful
//! insert is flushed before it is acknowledged: the index blob first, then
//! the mapping, which acts as the commit marker. On open, index entries
//! beyond the mapping are an interrupted insert and are discarded.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lode_core::config::{FailurePolicy, IndexConfig};
use lode_core::error::{LodeError, Result};
use lode_core::types::{Passage, PassageMeta, RetrievalHit};

use crate::embedding::{embed_with_timeout, DynEmbeddingService};
use crate::error_log::ErrorLog;
use crate::flat::{normalize, FlatIndex};
use crate::mapping::Mapping;

/// A store shared between one writer and any number of searchers.
pub type SharedStore = Arc<RwLock<VectorStore>>;

/// Locations of the three files that make up a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub index: PathBuf,
    pub mapping: PathBuf,
    pub error_log: PathBuf,
}

impl StorePaths {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            index: PathBuf::from(&config.index_path),
            mapping: PathBuf::from(&config.mapping_path),
            error_log: PathBuf::from(&config.error_log_path),
        }
    }

    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let defaults = IndexConfig::default();
        Self {
            index: dir.join(defaults.index_path),
            mapping: dir.join(defaults.mapping_path),
            error_log: dir.join(defaults.error_log_path),
        }
    }
}

/// Why a passage was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The key is in the error log.
    PreviouslyFailed,
    /// The key is already in the mapping.
    AlreadyIndexed,
}

/// Result of offering one passage to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Embedded, appended, and flushed to disk.
    Stored { position: usize },
    /// Not attempted.
    Skipped { reason: SkipReason },
    /// Embedding failed and the key was written to the error log.
    RecordedFailure { message: String },
    /// Embedding failed transiently and will be retried on the next run.
    Deferred { message: String },
    /// Embedded, but refused because the key is already mapped.
    Rejected { message: String },
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Stored { .. } => "stored",
            IngestOutcome::Skipped { .. } => "skipped",
            IngestOutcome::RecordedFailure { .. } => "recorded-failure",
            IngestOutcome::Deferred { .. } => "deferred",
            IngestOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Append-only store of normalized passage embeddings.
#[derive(Debug)]
pub struct VectorStore {
    paths: StorePaths,
    index: Option<FlatIndex>,
    mapping: Mapping,
    error_log: ErrorLog,
    skip_existing: bool,
    failure_policy: FailurePolicy,
}

impl VectorStore {
    /// Open the store described by `paths`.
    ///
    /// The mapping is loaded if present. The index is loaded only when the
    /// mapping is non-empty; otherwise it stays uninitialized until the first
    /// insert fixes its dimension.
    pub fn open(paths: StorePaths) -> Result<Self> {
        let mapping = Mapping::load(&paths.mapping)?;

        let mut index = if !mapping.is_empty() && paths.index.exists() {
            Some(FlatIndex::load(&paths.index)?)
        } else {
            None
        };

        match index.as_mut() {
            Some(idx) if idx.len() > mapping.len() => {
                warn!(
                    index_entries = idx.len(),
                    mapped_keys = mapping.len(),
                    "Discarding uncommitted index entries"
                );
                idx.truncate(mapping.len());
            }
            Some(idx) if idx.len() < mapping.len() => {
                return Err(LodeError::CorruptStore(format!(
                    "mapping lists {} keys but index holds {} vectors",
                    mapping.len(),
                    idx.len()
                )));
            }
            None if !mapping.is_empty() => {
                return Err(LodeError::CorruptStore(format!(
                    "mapping lists {} keys but index file {} is missing",
                    mapping.len(),
                    paths.index.display()
                )));
            }
            _ => {}
        }

        let error_log = ErrorLog::open(&paths.error_log);

        info!(
            entries = mapping.len(),
            dimension = index.as_ref().map(FlatIndex::dimension),
            skipped = error_log.len(),
            "Vector store opened"
        );

        Ok(Self {
            paths,
            index,
            mapping,
            error_log,
            skip_existing: true,
            failure_policy: FailurePolicy::default(),
        })
    }

    /// Open the store for querying only.
    ///
    /// Returns `None` when there is nothing to search: the mapping or index
    /// file is absent, or the mapping is empty. A missing file is a warning
    /// here, not `CorruptStore`.
    pub fn open_for_query(paths: StorePaths) -> Result<Option<Self>> {
        for (kind, path) in [("mapping", &paths.mapping), ("index", &paths.index)] {
            if !path.exists() {
                warn!(path = %path.display(), "Index or mapping not found ({} file)", kind);
                return Ok(None);
            }
        }
        let store = Self::open(paths)?;
        Ok((!store.is_empty()).then_some(store))
    }

    /// Open the store described by an index configuration section.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Ok(Self::open(StorePaths::from_config(config))?
            .with_skip_existing(config.skip_existing)
            .with_failure_policy(config.failure_policy))
    }

    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Wrap the store for shared single-writer/multi-reader access.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Vector dimension, once fixed by the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.index.as_ref().map(FlatIndex::dimension)
    }

    /// Number of vectors held by the index.
    pub fn index_len(&self) -> usize {
        self.index.as_ref().map(FlatIndex::len).unwrap_or(0)
    }

    /// Why `key` would be skipped without an embedding call, if it would be.
    pub fn skip_reason(&self, key: &str) -> Option<SkipReason> {
        if self.error_log.contains(key) {
            Some(SkipReason::PreviouslyFailed)
        } else if self.skip_existing && self.mapping.contains(key) {
            Some(SkipReason::AlreadyIndexed)
        } else {
            None
        }
    }

    /// Embed and store a single passage.
    pub async fn add_passage(
        &mut self,
        passage: &Passage,
        embedder: &dyn DynEmbeddingService,
        timeout: Duration,
    ) -> Result<IngestOutcome> {
        if let Some(reason) = self.skip_reason(&passage.key) {
            debug!(key = %passage.key, ?reason, "Skipping passage");
            return Ok(IngestOutcome::Skipped { reason });
        }
        let embedding = embed_passage(embedder, &passage.content, timeout).await;
        self.apply(passage, embedding)
    }

    /// Store the outcome of an embedding call made outside the store.
    ///
    /// Provider failures are absorbed into the returned outcome. Only
    /// dimension corruption and persistence failures are returned as errors.
    pub fn apply(
        &mut self,
        passage: &Passage,
        embedding: Result<Vec<f32>>,
    ) -> Result<IngestOutcome> {
        let vector = match embedding {
            Ok(vector) => vector,
            Err(e) => return Ok(self.record_failure(&passage.key, &e)),
        };

        match self.commit(passage, vector) {
            Ok(position) => Ok(IngestOutcome::Stored { position }),
            Err(LodeError::Validation(message)) => {
                warn!(key = %passage.key, %message, "Passage rejected");
                Ok(IngestOutcome::Rejected { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failed embedding according to the failure policy.
    pub fn record_failure(&mut self, key: &str, err: &LodeError) -> IngestOutcome {
        let message = err.to_string();

        if self.failure_policy == FailurePolicy::RetryTransient && err.is_transient() {
            warn!(key = %key, error = %message, "Transient embedding failure; will retry next run");
            return IngestOutcome::Deferred { message };
        }

        warn!(key = %key, error = %message, "Embedding failed; recording permanent skip");
        if let Err(e) = self.error_log.record(key, &message) {
            warn!(
                path = %self.error_log.path().display(),
                error = %e,
                "Failed to append to error log"
            );
        }
        IngestOutcome::RecordedFailure { message }
    }

    /// Normalize `vector`, append it under `passage.key`, and flush both files.
    ///
    /// Fails with `Corruption` before touching anything if the dimension does
    /// not match the index. If flushing fails the in-memory append is undone.
    pub fn commit(&mut self, passage: &Passage, mut vector: Vec<f32>) -> Result<usize> {
        if vector.is_empty() {
            return Err(LodeError::Validation(format!(
                "empty embedding for {}",
                passage.key
            )));
        }
        if self.mapping.contains(&passage.key) {
            return Err(LodeError::Validation(format!(
                "key {} is already indexed",
                passage.key
            )));
        }
        if let Some(dimension) = self.dimension() {
            if dimension != vector.len() {
                return Err(LodeError::Corruption {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        normalize(&mut vector);

        let fresh = self.index.is_none();
        let index = self
            .index
            .get_or_insert_with(|| FlatIndex::new(vector.len()));
        if fresh {
            info!(dimension = vector.len(), "Index dimension fixed");
        }
        let position = index.add(&vector)?;
        self.mapping.push(
            passage.key.clone(),
            PassageMeta {
                source_path: passage.source_path.clone(),
                created_at: Utc::now(),
            },
        )?;

        if let Err(e) = self.persist() {
            self.mapping.pop();
            if fresh {
                self.index = None;
            } else if let Some(index) = self.index.as_mut() {
                index.truncate(position);
            }
            return Err(e);
        }

        info!(key = %passage.key, position, "Stored");
        Ok(position)
    }

    /// Top-`k` hits for an already-normalized query vector.
    ///
    /// Positions the mapping does not know are dropped rather than trusted.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalHit>> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };
        if query.len() != index.dimension() {
            return Err(LodeError::Corruption {
                expected: index.dimension(),
                actual: query.len(),
            });
        }

        let hits = index
            .search(query, k.min(index.len()))
            .into_iter()
            .filter_map(|(score, position)| {
                let key = self.mapping.key_at(position);
                let meta = key.and_then(|key| self.mapping.meta.get(key));
                match (key, meta) {
                    (Some(key), Some(meta)) => Some(RetrievalHit {
                        key: key.to_string(),
                        score,
                        source_path: meta.source_path.clone(),
                        meta: meta.clone(),
                    }),
                    _ => {
                        warn!(position, "Index position has no mapping entry; dropped");
                        None
                    }
                }
            })
            .collect();
        Ok(hits)
    }

    fn persist(&self) -> Result<()> {
        if let Some(index) = self.index.as_ref() {
            index.save(&self.paths.index)?;
        }
        self.mapping.save(&self.paths.mapping)
    }
}

/// Embed passage text with a timeout, rejecting empty vectors as a provider
/// failure so they never reach the index.
pub async fn embed_passage(
    embedder: &dyn DynEmbeddingService,
    content: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    let vector = embed_with_timeout(embedder, content, timeout).await?;
    if vector.is_empty() {
        return Err(LodeError::provider("provider returned an empty embedding"));
    }
    Ok(vector)
}
