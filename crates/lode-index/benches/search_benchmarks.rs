//! Benchmarks for flat-index search and end-to-end query search.
//!
//! Uses 1,000 passages by default. Set `BENCH_FULL_SCALE=1` for 100,000:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p lode-index
//! ```
//!
//! Flat search is O(n * d), so latency grows linearly with the store.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use lode_core::types::Passage;
use lode_index::embedding::{EmbeddingService, MockEmbedding};
use lode_index::flat::{normalize, FlatIndex};
use lode_index::{SearchEngine, StorePaths, VectorStore};

const CI_PASSAGE_COUNT: usize = 1_000;
const FULL_SCALE_PASSAGE_COUNT: usize = 100_000;

/// Realistic passage text, made unique by a trailing identifier.
fn passage_text(index: usize) -> String {
    format!(
        "The quarterly report covers revenue growth across the northern region, \
         supplier contract renewals, and the migration of the billing service to \
         the new datacenter. Staff noted that onboarding times improved after the \
         documentation overhaul. Passage identifier: {}",
        index
    )
}

fn passage_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_PASSAGE_COUNT
    } else {
        CI_PASSAGE_COUNT
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

fn build_flat_index(count: usize, embedder: &MockEmbedding) -> FlatIndex {
    let rt = runtime();
    let mut index = FlatIndex::new(embedder.dimensions());
    for i in 0..count {
        let mut vector = rt
            .block_on(embedder.embed(&passage_text(i)))
            .expect("embed failed");
        normalize(&mut vector);
        index.add(&vector).expect("add failed");
    }
    assert_eq!(index.len(), count);
    index
}

fn bench_flat_search(c: &mut Criterion) {
    let count = passage_count();
    let embedder = MockEmbedding::new();
    let index = build_flat_index(count, &embedder);

    let query = runtime()
        .block_on(embedder.embed("billing service migration"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("flat_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for k in [1, 10, 100] {
        group.bench_function(format!("top{}_{}passages", k, count), |b| {
            b.iter(|| {
                let hits = index.search(&query, k);
                assert!(!hits.is_empty());
                hits
            });
        });
    }

    group.finish();
}

/// Passages for the end-to-end benchmark. Each insert is flushed to disk, so
/// building the store is kept small.
const ENGINE_PASSAGE_COUNT: usize = 200;

fn bench_engine_search(c: &mut Criterion) {
    let count = ENGINE_PASSAGE_COUNT;
    let dir = tempfile::tempdir().expect("tempdir");
    let embedder = MockEmbedding::new();
    let rt = runtime();

    let mut store = VectorStore::open(StorePaths::in_dir(dir.path())).expect("open store");
    for i in 0..count {
        let key = format!("p{:06}.txt", i);
        let passage = Passage::new(key.clone(), passage_text(i), dir.path().join(&key));
        rt.block_on(store.add_passage(&passage, &embedder, Duration::from_secs(5)))
            .expect("add failed");
    }

    let engine = SearchEngine::new(
        store.into_shared(),
        MockEmbedding::new(),
        Duration::from_secs(5),
    );

    let mut group = c.benchmark_group("engine_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("query_top5_{}passages", count), |b| {
        b.iter(|| {
            rt.block_on(engine.search("supplier contract renewals", 5))
                .expect("search failed")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_flat_search, bench_engine_search);
criterion_main!(benches);
