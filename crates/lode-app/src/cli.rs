//! CLI argument definitions for the lode binary.
//!
//! Uses `clap` with derive macros. Priority resolution: CLI args > env vars >
//! config file > defaults.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use lode_index::StorePaths;

/// Lode - build a semantic passage index, search it, and distill the hits.
#[derive(Parser, Debug)]
#[command(name = "lode", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed every passage file and append it to the index.
    Build(BuildArgs),
    /// Print the passages most similar to a query.
    Search(SearchArgs),
    /// Search, distill each hit against the query, and drop the irrelevant ones.
    Distill(DistillArgs),
}

/// Overrides for the on-disk store locations.
#[derive(Args, Debug, Default, Clone)]
pub struct StoreArgs {
    /// Index file path.
    #[arg(long = "index")]
    pub index: Option<PathBuf>,

    /// Mapping file path.
    #[arg(long = "mapping")]
    pub mapping: Option<PathBuf>,

    /// Error log path.
    #[arg(long = "error-log")]
    pub error_log: Option<PathBuf>,
}

impl StoreArgs {
    /// Replace any configured path that was given on the command line.
    pub fn apply(&self, paths: &mut StorePaths) {
        if let Some(ref p) = self.index {
            paths.index = p.clone();
        }
        if let Some(ref p) = self.mapping {
            paths.mapping = p.clone();
        }
        if let Some(ref p) = self.error_log {
            paths.error_log = p.clone();
        }
    }
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Directory of passage files.
    #[arg(long = "passages")]
    pub passages: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Re-embed passages that are already indexed instead of skipping them.
    #[arg(long = "no-skip")]
    pub no_skip: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text.
    #[arg(long = "q")]
    pub query: String,

    /// Number of hits to return.
    #[arg(long = "k")]
    pub k: Option<usize>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug)]
pub struct DistillArgs {
    /// Query text.
    #[arg(long = "q")]
    pub query: String,

    /// Number of hits to distill.
    #[arg(long = "k")]
    pub k: Option<usize>,

    /// Drop results at or above this similarity to "no relevant information".
    #[arg(long = "threshold")]
    pub threshold: Option<f64>,

    /// Distillation model override.
    #[arg(long = "model")]
    pub model: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LODE_CONFIG env var > ~/.lode/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LODE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Whether the config path was chosen explicitly rather than defaulted.
    pub fn config_is_explicit(&self) -> bool {
        self.config.is_some() || std::env::var_os("LODE_CONFIG").is_some()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".lode").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".lode").join("config.toml");
    }
    PathBuf::from("config.toml")
}
