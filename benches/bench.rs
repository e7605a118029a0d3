//! Criterion benchmarks for the Phalanx search engine.
//!
//! This module contains benchmarks for the major components of the
//! execution engine, including:
//! - Slicing segment lists
//! - Shared bottom-value updates under contention
//! - Parallel top-K search with every control plane
//! - Merging slice results

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use phalanx::parallel_search::config::{ControlPlaneType, ParallelSearchConfig, SearchOptions};
use phalanx::parallel_search::engine::ParallelSearchEngine;
use phalanx::parallel_search::merger::merge_top_docs;
use phalanx::parallel_search::slicer::slices;
use phalanx::query::checker::{BottomValueChecker, MaxBottomScoreChecker};
use phalanx::query::query::{FieldScoreQuery, MatchAllQuery, Query};
use phalanx::query::sort::{Sort, SortValue};
use phalanx::query::top_docs::{ScoreDoc, TopDocs, TotalHits};
use phalanx::segment::{MemorySegment, SegmentRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate `count` segments of `docs` documents each with `price` and
/// `rating` fields.
fn generate_segments(count: usize, docs: u32, index_sort: Option<&Sort>) -> Vec<SegmentRef> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut base = 0;
    (0..count)
        .map(|i| {
            let mut builder = MemorySegment::builder(format!("seg-{i}")).doc_base(base);
            if let Some(sort) = index_sort {
                builder = builder.index_sort(sort.clone());
            }
            for _ in 0..docs {
                builder.push_document([
                    ("price", SortValue::Long(rng.random_range(0..100_000))),
                    ("rating", SortValue::Double(rng.random_range(0.0..5.0))),
                ]);
            }
            base += docs;
            Arc::new(builder.build().expect("segment")) as SegmentRef
        })
        .collect()
}

/// Benchmark slicing of segment lists of varying length.
fn bench_slicing(c: &mut Criterion) {
    let mut group = c.benchmark_group("slicing");
    let mut rng = StdRng::seed_from_u64(7);

    for count in [10, 100, 1000] {
        let mut base = 0;
        let segments: Vec<SegmentRef> = (0..count)
            .map(|i| {
                let docs = rng.random_range(1..400_000);
                let segment = MemorySegment::with_doc_count(format!("seg-{i}"), docs)
                    .with_doc_base(base);
                base += docs;
                Arc::new(segment) as SegmentRef
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &segments, |b, segments| {
            b.iter(|| black_box(slices(black_box(segments), 250_000, 5, None)))
        });
    }

    group.finish();
}

/// Benchmark contended updates of the shared bottom score.
fn bench_bottom_score_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("bottom_score");
    group.throughput(Throughput::Elements(4 * 10_000));

    group.bench_function("contended_4_threads", |b| {
        b.iter(|| {
            let checker = MaxBottomScoreChecker::new();
            std::thread::scope(|scope| {
                for t in 0..4 {
                    let checker = &checker;
                    scope.spawn(move || {
                        for i in 0..10_000u32 {
                            checker.update_thread_local_bottom_value((i * 4 + t) as f32);
                        }
                    });
                }
            });
            black_box(checker.bottom_value())
        })
    });

    group.finish();
}

/// Benchmark parallel top-K search with each control plane.
fn bench_parallel_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_search");
    group.sample_size(20);

    let segments = generate_segments(16, 20_000, None);
    let query: Arc<dyn Query> = Arc::new(FieldScoreQuery::new("rating"));
    group.throughput(Throughput::Elements(16 * 20_000));

    for plane in [
        ControlPlaneType::Sequential,
        ControlPlaneType::QueueSizeBased,
        ControlPlaneType::SliceBased,
        ControlPlaneType::Rayon,
    ] {
        let engine = ParallelSearchEngine::new(ParallelSearchConfig {
            max_docs_per_slice: 50_000,
            max_segments_per_slice: 2,
            thread_pool_size: Some(4),
            control_plane: plane,
            enable_metrics: false,
            ..Default::default()
        })
        .expect("engine");

        group.bench_function(format!("top_10_by_score/{plane:?}"), |b| {
            b.iter(|| {
                let outcome = engine
                    .search(Arc::clone(&query), &segments, SearchOptions::new(10))
                    .expect("search");
                black_box(outcome)
            })
        });
    }

    group.finish();
}

/// Benchmark early termination on index-sorted segments against a full scan.
fn bench_early_termination(c: &mut Criterion) {
    let mut group = c.benchmark_group("early_termination");
    group.sample_size(20);

    let index_sort: Sort = "price:long".parse().expect("sort");
    let segments = generate_segments(16, 20_000, Some(&index_sort));
    let engine = ParallelSearchEngine::new(ParallelSearchConfig {
        max_docs_per_slice: 50_000,
        max_segments_per_slice: 2,
        thread_pool_size: Some(4),
        ..Default::default()
    })
    .expect("engine");
    let query: Arc<dyn Query> = Arc::new(MatchAllQuery::new());

    for (name, threshold) in [("pruned", 1_000), ("exact", u64::MAX)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let options = SearchOptions::new(100)
                    .with_sort(index_sort.clone())
                    .with_total_hits_threshold(threshold)
                    .with_metrics(false);
                black_box(
                    engine
                        .search(Arc::clone(&query), &segments, options)
                        .expect("search"),
                )
            })
        });
    }

    group.finish();
}

/// Benchmark the K-way merge of slice results.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let mut rng = StdRng::seed_from_u64(3);

    for shards in [4, 16, 64] {
        let results: Vec<TopDocs> = (0..shards)
            .map(|shard| {
                let mut scores: Vec<f32> = (0..1000).map(|_| rng.random_range(0.0..100.0)).collect();
                scores.sort_by(|a, b| b.total_cmp(a));
                TopDocs {
                    total_hits: TotalHits::exact(1000),
                    score_docs: scores
                        .into_iter()
                        .enumerate()
                        .map(|(i, score)| ScoreDoc {
                            doc: (shard * 1000 + i) as u32,
                            score,
                            sort_values: vec![SortValue::Score(score)],
                        })
                        .collect(),
                }
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("top_1000", shards), &results, |b, results| {
            b.iter(|| black_box(merge_top_docs(&Sort::relevance(), 1000, results)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_slicing,
    bench_bottom_score_updates,
    bench_parallel_search,
    bench_early_termination,
    bench_merge
);

criterion_main!(benches);
