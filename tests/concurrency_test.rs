use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use phalanx::error::{PhalanxError, Result};
use phalanx::parallel_search::cancellation::CancelReason;
use phalanx::parallel_search::config::{ControlPlaneType, ParallelSearchConfig, SearchOptions};
use phalanx::parallel_search::control_plane::{ExecutionControlPlane, QueueSizeBasedControlPlane};
use phalanx::parallel_search::engine::{ParallelSearchEngine, SearchOutcome};
use phalanx::parallel_search::pool::{Task, WorkerPool};
use phalanx::query::checker::{
    BottomValueChecker, FieldBottom, FieldValueChecker, MaxBottomScoreChecker,
};
use phalanx::query::matcher::{AllDocsMatcher, Matcher};
use phalanx::query::query::{MatchAllQuery, Query};
use phalanx::query::sort::{Sort, SortValue};
use phalanx::segment::{DocId, MemorySegment, Segment, SegmentRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn plain_segments(counts: &[u32]) -> Vec<SegmentRef> {
    let mut base = 0;
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let segment = MemorySegment::with_doc_count(format!("seg-{i}"), count).with_doc_base(base);
            base += count;
            Arc::new(segment) as SegmentRef
        })
        .collect()
}

fn one_segment_per_slice(control_plane: ControlPlaneType) -> ParallelSearchEngine {
    ParallelSearchEngine::new(ParallelSearchConfig {
        max_docs_per_slice: 1_000,
        max_segments_per_slice: 1,
        thread_pool_size: Some(2),
        control_plane,
        ..Default::default()
    })
    .unwrap()
}

/// Fails on one segment, matches everything elsewhere.
#[derive(Debug, Clone)]
struct FailOnSegment {
    segment: String,
    panic: bool,
}

impl Query for FailOnSegment {
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>> {
        if segment.id() == self.segment {
            if self.panic {
                panic!("corrupt segment {}", self.segment);
            }
            return Err(PhalanxError::segment(format!("cannot read {}", self.segment)));
        }
        Ok(Box::new(AllDocsMatcher::new(segment.doc_count(), 1.0)))
    }

    fn description(&self) -> String {
        format!("fail_on({})", self.segment)
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

/// Matches every document, sleeping before each one.
#[derive(Debug, Clone)]
struct SlowQuery {
    delay: Duration,
}

#[derive(Debug)]
struct SlowMatcher {
    inner: AllDocsMatcher,
    delay: Duration,
}

impl Matcher for SlowMatcher {
    fn doc_id(&self) -> DocId {
        self.inner.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        thread::sleep(self.delay);
        self.inner.next()
    }

    fn score(&self) -> f32 {
        self.inner.score()
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }
}

impl Query for SlowQuery {
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(SlowMatcher {
            inner: AllDocsMatcher::new(segment.doc_count(), 1.0),
            delay: self.delay,
        }))
    }

    fn description(&self) -> String {
        "slow".to_string()
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

#[test]
fn test_backpressure_runs_tasks_on_caller() {
    let pool = Arc::new(WorkerPool::new("test-backpressure", 1).unwrap());
    let plane = QueueSizeBasedControlPlane::new(Arc::clone(&pool), 1.0);

    // Occupy the only worker until released.
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let blocker = pool.execute(Box::new(move || -> Result<()> {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    }));
    started_rx.recv().unwrap();
    assert_eq!(pool.queue_len(), 0);

    let caller = thread::current().id();
    let tasks: Vec<Task<ThreadId>> = (0..4)
        .map(|_| Box::new(|| -> Result<ThreadId> { Ok(thread::current().id()) }) as Task<ThreadId>)
        .collect();
    let futures = plane.invoke_all(tasks);

    // The first task fills the queue to its limit of 1, the rest run here.
    let on_caller: Vec<bool> = futures.iter().map(|f| f.executed_on_caller()).collect();
    assert_eq!(on_caller, vec![false, true, true, true]);
    assert_eq!(pool.queue_len(), 1);

    release_tx.send(()).unwrap();
    blocker.wait().unwrap();
    let ids: Vec<ThreadId> = futures.into_iter().map(|f| f.wait().unwrap()).collect();
    assert_ne!(ids[0], caller);
    assert!(ids[1..].iter().all(|id| *id == caller));
}

#[test]
fn test_failed_slice_is_reported_not_merged() {
    let segments = plain_segments(&[10, 20, 30, 40]);
    for plane in [
        ControlPlaneType::QueueSizeBased,
        ControlPlaneType::Rayon,
        ControlPlaneType::Sequential,
    ] {
        let engine = one_segment_per_slice(plane);
        let failing_slice = engine
            .slices(&segments)
            .iter()
            .position(|slice| slice.segments()[0].id() == "seg-2")
            .unwrap();

        let outcome = engine
            .search(
                Arc::new(FailOnSegment {
                    segment: "seg-2".into(),
                    panic: false,
                }),
                &segments,
                SearchOptions::new(5),
            )
            .unwrap();
        match outcome {
            SearchOutcome::PartialFailure {
                failures,
                succeeded,
            } => {
                assert_eq!(succeeded, 3);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].slice, failing_slice);
                assert!(matches!(
                    failures[0].error,
                    PhalanxError::SliceExecution { slice, .. } if slice == failing_slice
                ));
            }
            other => panic!("expected a partial failure, got {other:?}"),
        }
        let metrics = engine.metrics();
        assert_eq!(metrics.partial_failures, 1);
        assert_eq!(metrics.total_hits_returned, 0);
    }
}

#[test]
fn test_panicking_slice_does_not_poison_siblings() {
    let segments = plain_segments(&[10, 20, 30]);
    let engine = one_segment_per_slice(ControlPlaneType::SliceBased);
    let query: Arc<dyn Query> = Arc::new(FailOnSegment {
        segment: "seg-1".into(),
        panic: true,
    });

    for _ in 0..3 {
        let outcome = engine
            .search(Arc::clone(&query), &segments, SearchOptions::new(5))
            .unwrap();
        assert!(matches!(
            outcome,
            SearchOutcome::PartialFailure { succeeded: 2, .. }
        ));
    }

    // The pool survives the panics.
    let top_docs = engine
        .search(Arc::new(MatchAllQuery::new()), &segments, SearchOptions::new(5))
        .unwrap()
        .into_top_docs()
        .unwrap();
    assert_eq!(top_docs.doc_ids(), vec![0, 1, 2, 3, 4]);
    assert_eq!(top_docs.total_hits.value, 60);
}

#[test]
fn test_cancel_running_query_by_id() {
    let segments = plain_segments(&[50; 8]);
    let engine = ParallelSearchEngine::new(ParallelSearchConfig {
        max_docs_per_slice: 100,
        max_segments_per_slice: 4,
        thread_pool_size: Some(2),
        ..Default::default()
    })
    .unwrap();
    let query: Arc<dyn Query> = Arc::new(SlowQuery {
        delay: Duration::from_millis(2),
    });

    let start = Instant::now();
    let outcome = thread::scope(|scope| {
        let searcher = scope.spawn(|| {
            engine.search(
                Arc::clone(&query),
                &segments,
                SearchOptions::new(10).with_query_id("slow-1"),
            )
        });

        while !engine.running_queries().contains(&"slow-1".to_string()) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(engine.cancel("slow-1").unwrap());
        searcher.join().unwrap()
    })
    .unwrap();

    match outcome {
        SearchOutcome::Cancelled { query_id, reason } => {
            assert_eq!(query_id, "slow-1");
            assert_eq!(reason, CancelReason::Requested);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    // Each slice holds 150 docs, 300ms of work if it ran to the end.
    assert!(start.elapsed() < Duration::from_millis(290));
    assert!(engine.running_queries().is_empty());
    assert!(!engine.cancel("slow-1").unwrap());
    assert_eq!(engine.metrics().cancelled_searches, 1);
}

#[test]
fn test_query_times_out() {
    let segments = plain_segments(&[20; 8]);
    let engine = one_segment_per_slice(ControlPlaneType::QueueSizeBased);
    let outcome = engine
        .search(
            Arc::new(SlowQuery {
                delay: Duration::from_millis(2),
            }),
            &segments,
            SearchOptions::new(10).with_timeout(Duration::from_millis(20)),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        SearchOutcome::Cancelled {
            reason: CancelReason::Timeout,
            ..
        }
    ));
    assert!(outcome.into_top_docs().unwrap_err().is_cancellation());
}

#[test]
fn test_concurrent_searches_share_one_engine() {
    let segments = plain_segments(&[100, 200, 300, 400, 500]);
    let engine = ParallelSearchEngine::new(ParallelSearchConfig {
        max_docs_per_slice: 400,
        max_segments_per_slice: 2,
        thread_pool_size: Some(4),
        ..Default::default()
    })
    .unwrap();

    thread::scope(|scope| {
        for t in 0..8u32 {
            let engine = &engine;
            let segments = &segments;
            scope.spawn(move || {
                for _ in 0..10 {
                    let top_docs = engine
                        .search(
                            Arc::new(MatchAllQuery::new()),
                            segments,
                            SearchOptions::new(3 + t as usize)
                                .with_sort(Sort::index_order())
                                .with_total_hits_threshold(u64::MAX),
                        )
                        .unwrap()
                        .into_top_docs()
                        .unwrap();
                    assert_eq!(top_docs.doc_ids(), (0..3 + t).collect::<Vec<u32>>());
                    assert_eq!(top_docs.total_hits.value, 1500);
                }
            });
        }
    });
    assert_eq!(engine.metrics().completed_searches, 80);
}

#[test]
fn test_score_bound_is_monotonic_under_contention() {
    let checker = Arc::new(MaxBottomScoreChecker::new());
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let checker = Arc::clone(&checker);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = f32::NEG_INFINITY;
            while !done.load(Ordering::Acquire) {
                if let Some(value) = checker.bottom_value() {
                    assert!(value >= last, "bound regressed from {last} to {value}");
                    last = value;
                }
            }
        })
    };

    let writers: Vec<_> = (0..8u64)
        .map(|t| {
            let checker = Arc::clone(&checker);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                let mut best = f32::NEG_INFINITY;
                for _ in 0..10_000 {
                    let value = rng.random_range(0.0..1000.0_f32);
                    checker.update_thread_local_bottom_value(value);
                    best = best.max(value);
                    // Our own best is never lost.
                    assert!(checker.bottom_value().unwrap() >= best);
                }
                best
            })
        })
        .collect();

    let best = writers
        .into_iter()
        .map(|w| w.join().unwrap())
        .fold(f32::NEG_INFINITY, f32::max);
    done.store(true, Ordering::Release);
    reader.join().unwrap();
    assert_eq!(checker.bottom_value(), Some(best));
}

#[test]
fn test_field_bound_is_monotonic_under_contention() {
    let sort: Sort = "price:long:desc".parse().unwrap();
    let checker = Arc::new(FieldValueChecker::new(sort.clone()));

    let writers: Vec<_> = (0..6u64)
        .map(|t| {
            let checker = Arc::clone(&checker);
            let sort = sort.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + t);
                let mut last: Option<Arc<FieldBottom>> = None;
                for _ in 0..5_000 {
                    let candidate = Arc::new(FieldBottom {
                        sort_values: vec![SortValue::Long(rng.random_range(0..500))],
                        doc: rng.random_range(0..10_000),
                    });
                    checker.update_thread_local_bottom_value(candidate);
                    let current = checker.bottom_value().unwrap();
                    if let Some(previous) = &last {
                        assert_ne!(
                            sort.compare_ranked(
                                &current.sort_values,
                                current.doc,
                                &previous.sort_values,
                                previous.doc
                            ),
                            std::cmp::Ordering::Greater,
                            "bound regressed"
                        );
                    }
                    last = Some(current);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let bound = checker.bottom_value().unwrap();
    assert_eq!(bound.sort_values, vec![SortValue::Long(499)]);
}
