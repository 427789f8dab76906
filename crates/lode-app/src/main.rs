//! Lode application binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Select embedding and distillation providers
//! 3. Open the vector store
//! 4. Run `build`, `search`, or `distill`
//!
//! Exit status is 2 when the store is corrupt or a vector dimension does not
//! match, 1 for configuration and I/O errors, and 0 otherwise, including
//! partial results, an unbuilt index, and a query that could not be embedded.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use lode_core::config::{DistillConfig, EmbeddingConfig, LodeConfig, ProviderKind};
use lode_core::error::{LodeError, Result};
use lode_distill::{
    DistillOptions, DistillPipeline, DistillationProvider, MockDistiller, NoInfoMatcher,
    OpenAiDistiller,
};
use lode_index::embedding::{DynEmbeddingService, MockEmbedding, OpenAiEmbedding};
use lode_index::{
    load_passages, IngestOptions, IngestOutcome, IngestPipeline, SearchEngine, SearchStatus,
    SkipReason, StorePaths, VectorStore,
};

use crate::cli::{BuildArgs, CliArgs, Command, DistillArgs, SearchArgs, StoreArgs};

/// Expand ~ to the home directory in a path string.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Resolve a configured path; relative paths live under the data directory.
fn resolve_in(data_dir: &Path, path: &str) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        path
    } else {
        data_dir.join(path)
    }
}

fn store_paths(config: &LodeConfig, overrides: &StoreArgs) -> StorePaths {
    let data_dir = expand_home(&config.general.data_dir);
    let mut paths = StorePaths {
        index: resolve_in(&data_dir, &config.index.index_path),
        mapping: resolve_in(&data_dir, &config.index.mapping_path),
        error_log: resolve_in(&data_dir, &config.index.error_log_path),
    };
    overrides.apply(&mut paths);
    paths
}

/// Load the config file. A missing default file means defaults; a missing
/// file that was asked for explicitly is an error.
fn load_config(args: &CliArgs) -> Result<LodeConfig> {
    let path = args.resolve_config_path();
    let config = if path.exists() || args.config_is_explicit() {
        LodeConfig::load(&path)?
    } else {
        LodeConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(cli_level: Option<&str>, config_level: &str) {
    let filter = match cli_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    Ok(match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiEmbedding::from_config(config)?),
        ProviderKind::Mock => {
            tracing::info!("Using mock embedding provider");
            Arc::new(MockEmbedding::new())
        }
    })
}

fn build_distiller(config: &DistillConfig) -> Result<Arc<dyn DistillationProvider>> {
    Ok(match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiDistiller::from_config(config)?),
        ProviderKind::Mock => {
            tracing::info!("Using mock distillation provider");
            Arc::new(MockDistiller::new(config.no_info.phrase.clone()))
        }
    })
}

fn describe(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Stored { position } => format!("stored at {}", position),
        IngestOutcome::Skipped {
            reason: SkipReason::AlreadyIndexed,
        } => "skipped (already indexed)".to_string(),
        IngestOutcome::Skipped {
            reason: SkipReason::PreviouslyFailed,
        } => "skipped (previously failed)".to_string(),
        IngestOutcome::RecordedFailure { message } => format!("failed: {}", message),
        IngestOutcome::Deferred { message } => format!("deferred: {}", message),
        IngestOutcome::Rejected { message } => format!("rejected: {}", message),
    }
}

async fn build(args: BuildArgs, mut config: LodeConfig) -> Result<()> {
    if args.no_skip {
        config.index.skip_existing = false;
    }
    let paths = store_paths(&config, &args.store);
    let passages_dir = match args.passages {
        Some(dir) => dir,
        None => resolve_in(
            &expand_home(&config.general.data_dir),
            &config.index.passages_dir,
        ),
    };

    let store = VectorStore::open(paths)?
        .with_skip_existing(config.index.skip_existing)
        .with_failure_policy(config.index.failure_policy);

    let (passages, unreadable) = load_passages(&passages_dir, &config.index.passage_extension)?;
    if passages.is_empty() && unreadable.is_empty() {
        println!(
            "No .{} files found in {}",
            config.index.passage_extension,
            passages_dir.display()
        );
        return Ok(());
    }

    let embedder = build_embedder(&config.embedding)?;
    let pipeline = IngestPipeline::new(
        store.into_shared(),
        embedder,
        IngestOptions::from(&config.embedding),
    );
    let report = pipeline.run(passages).await?;

    for entry in &report.entries {
        println!("{}: {}", entry.key, describe(&entry.outcome));
    }
    for file in &unreadable {
        println!("{}: unreadable: {}", file.key, file.error);
    }
    println!(
        "Done. stored={} skipped={} failed={} deferred={} rejected={} unreadable={}",
        report.stored(),
        report.skipped(),
        report.failed(),
        report.deferred(),
        report.rejected(),
        unreadable.len()
    );
    Ok(())
}

/// Open the store and the search engine, or `None` when nothing is indexed.
fn open_search(config: &LodeConfig, overrides: &StoreArgs) -> Result<Option<SearchEngine>> {
    let Some(store) = VectorStore::open_for_query(store_paths(config, overrides))? else {
        return Ok(None);
    };
    let embedder = build_embedder(&config.embedding)?;
    Ok(Some(SearchEngine::new_dyn(
        store.into_shared(),
        embedder,
        Duration::from_secs(config.embedding.timeout_secs),
    )))
}

/// A query whose embedding could not be computed yields no results rather than
/// a failed run. Other errors pass through unchanged.
fn query_outcome<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ (LodeError::Provider { .. } | LodeError::Timeout { .. })) => {
            tracing::warn!(error = %e, "Query embedding failed");
            eprintln!("query embedding failed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn search(args: SearchArgs, config: LodeConfig) -> Result<()> {
    let Some(engine) = open_search(&config, &args.store)? else {
        println!("index not built yet");
        return Ok(());
    };
    let k = args.k.unwrap_or(config.distill.default_top_k);
    let Some(response) = query_outcome(engine.search(&args.query, k).await)? else {
        return Ok(());
    };

    match response.status {
        SearchStatus::NotBuilt => println!("index not built yet"),
        SearchStatus::NoMatches => println!("no matches"),
        SearchStatus::Found => {
            for hit in &response.hits {
                println!(
                    "{}: score={:.4} file={}",
                    hit.key,
                    hit.score,
                    hit.source_path.display()
                );
            }
        }
    }
    Ok(())
}

async fn distill(args: DistillArgs, mut config: LodeConfig) -> Result<()> {
    if let Some(model) = args.model {
        config.distill.model = model;
    }
    let k = args.k.unwrap_or(config.distill.default_top_k);
    let threshold = args.threshold.unwrap_or(config.distill.threshold);

    let Some(engine) = open_search(&config, &args.store)? else {
        eprintln!("index not built yet");
        println!("[]");
        return Ok(());
    };

    let pipeline = DistillPipeline::new(
        engine,
        build_distiller(&config.distill)?,
        NoInfoMatcher::from_config(&config.distill.no_info),
        DistillOptions::from(&config),
    );
    let Some(response) = query_outcome(pipeline.run(&args.query, k, threshold).await)? else {
        println!("[]");
        return Ok(());
    };
    if response.status != SearchStatus::Found {
        eprintln!("no matches");
    }
    println!("{}", serde_json::to_string_pretty(&response.results)?);
    Ok(())
}

async fn run(command: Command, config: LodeConfig) -> Result<()> {
    match command {
        Command::Build(args) => build(args, config).await,
        Command::Search(args) => search(args, config).await,
        Command::Distill(args) => distill(args, config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };
    init_tracing(args.log_level.as_deref(), &config.general.log_level);
    tracing::debug!("Starting lode v{}", env!("CARGO_PKG_VERSION"));

    match run(args.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "lode failed");
            eprintln!("error: {}", e);
            ExitCode::from(if e.is_fatal() { 2 } else { 1 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_in_keeps_absolute_paths() {
        let base = Path::new("/data");
        let absolute = std::env::temp_dir().join("index.bin");
        assert_eq!(resolve_in(base, &absolute.display().to_string()), absolute);
        assert_eq!(resolve_in(base, "index.bin"), base.join("index.bin"));
    }

    #[test]
    fn test_store_paths_use_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LodeConfig::default();
        config.general.data_dir = dir.path().display().to_string();

        let paths = store_paths(&config, &StoreArgs::default());
        assert_eq!(paths, StorePaths::in_dir(dir.path()));
    }

    #[test]
    fn test_load_config_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let args = CliArgs::try_parse_from([
            "lode",
            "search",
            "--q",
            "x",
            "--config",
            missing.to_str().unwrap(),
        ])
        .unwrap();
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_load_config_rejects_invalid_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[distill]\nthreshold = 2.0\n").unwrap();
        let args =
            CliArgs::try_parse_from(["lode", "build", "--config", path.to_str().unwrap()]).unwrap();
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_describe_outcomes() {
        assert_eq!(
            describe(&IngestOutcome::Stored { position: 3 }),
            "stored at 3"
        );
        assert_eq!(
            describe(&IngestOutcome::Skipped {
                reason: SkipReason::PreviouslyFailed
            }),
            "skipped (previously failed)"
        );
    }

    #[tokio::test]
    async fn test_build_then_search_with_mock_providers() {
        let dir = tempfile::tempdir().unwrap();
        let passages = dir.path().join("passages");
        std::fs::create_dir_all(&passages).unwrap();
        std::fs::write(passages.join("p1.txt"), "cats are mammals").unwrap();
        std::fs::write(passages.join("p2.txt"), "the sun is a star").unwrap();

        let mut config = LodeConfig::default();
        config.general.data_dir = dir.path().display().to_string();
        config.embedding.provider = ProviderKind::Mock;
        config.distill.provider = ProviderKind::Mock;

        build(
            BuildArgs {
                passages: None,
                store: StoreArgs::default(),
                no_skip: false,
            },
            config.clone(),
        )
        .await
        .unwrap();

        let store = VectorStore::open(StorePaths::in_dir(dir.path())).unwrap();
        assert_eq!(store.len(), 2);

        let engine = open_search(&config, &StoreArgs::default())
            .unwrap()
            .expect("store is built");
        let response = engine.search("mammal", 1).await.unwrap();
        assert_eq!(response.hits[0].key, "p1.txt");
    }

    #[test]
    fn test_query_embedding_failure_is_not_an_error() {
        let failed: Result<u32> = Err(LodeError::transient("HTTP 503"));
        assert_eq!(query_outcome(failed).unwrap(), None);

        let timed_out: Result<u32> = Err(LodeError::Timeout {
            operation: "embedding".into(),
            secs: 5,
        });
        assert_eq!(query_outcome(timed_out).unwrap(), None);

        assert_eq!(query_outcome(Ok(7)).unwrap(), Some(7));

        let corrupt: Result<u32> = Err(LodeError::Corruption {
            expected: 3,
            actual: 4,
        });
        assert!(query_outcome(corrupt).unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_open_search_without_index_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let passages = dir.path().join("passages");
        std::fs::create_dir_all(&passages).unwrap();
        std::fs::write(passages.join("p1.txt"), "cats are mammals").unwrap();

        let mut config = LodeConfig::default();
        config.general.data_dir = dir.path().display().to_string();
        config.embedding.provider = ProviderKind::Mock;

        build(
            BuildArgs {
                passages: None,
                store: StoreArgs::default(),
                no_skip: false,
            },
            config.clone(),
        )
        .await
        .unwrap();
        std::fs::remove_file(StorePaths::in_dir(dir.path()).index).unwrap();

        assert!(open_search(&config, &StoreArgs::default()).unwrap().is_none());
    }

    #[test]
    fn test_open_search_on_empty_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LodeConfig::default();
        config.general.data_dir = dir.path().display().to_string();
        assert!(open_search(&config, &StoreArgs::default()).unwrap().is_none());
    }
}
