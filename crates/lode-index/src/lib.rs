//! Lode index crate - embedding seam, flat inner-product index, durable
//! vector store, ingestion pipeline, and similarity search.
//!
//! The [`VectorStore`] is the single writer of the on-disk index/mapping pair.
//! [`IngestPipeline`] fans embedding calls out to a bounded pool and funnels
//! the results back into that writer; [`SearchEngine`] answers queries from a
//! shared read lock.

mod atomic;
pub mod embedding;
pub mod error_log;
pub mod flat;
pub mod http;
pub mod ingest;
pub mod mapping;
pub mod passages;
pub mod search;
pub mod store;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OpenAiEmbedding, ScriptedEmbedding,
};
pub use error_log::{ErrorLog, ErrorLogEntry};
pub use flat::FlatIndex;
pub use ingest::{IngestEntry, IngestOptions, IngestPipeline, IngestReport};
pub use mapping::Mapping;
pub use passages::{load_passages, UnreadablePassage};
pub use search::{SearchEngine, SearchResponse, SearchStatus};
pub use store::{IngestOutcome, SharedStore, SkipReason, StorePaths, VectorStore};
