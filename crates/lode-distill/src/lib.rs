//! Lode distillation crate - turns ranked search hits into query-relevant
//! excerpts and drops the ones that amount to "no relevant information".

pub mod noinfo;
pub mod pipeline;
pub mod provider;

pub use noinfo::NoInfoMatcher;
pub use pipeline::{apply_threshold, DistillOptions, DistillPipeline, DistillResponse};
pub use provider::{build_prompt, DistillationProvider, MockDistiller, OpenAiDistiller};
