//! Command implementations for the Phalanx CLI.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{PhalanxError, Result};
use crate::parallel_search::circuit_breaker::{NeverProceed, SliceAllocationCircuitBreaker};
use crate::parallel_search::config::{ControlPlaneType, ParallelSearchConfig, SearchOptions};
use crate::parallel_search::engine::{ParallelSearchEngine, SearchOutcome};
use crate::parallel_search::slicer::slices;
use crate::query::query::{FieldScoreQuery, MatchAllQuery, Query};
use crate::query::sort::{Sort, SortValue};
use crate::query::top_docs::{TopDocs, TotalHitsRelation};
use crate::segment::{MemorySegment, SegmentRef};

const CATEGORIES: [&str; 5] = ["books", "garden", "music", "sports", "toys"];

/// Execute a CLI command.
pub fn execute_command(args: PhalanxArgs) -> Result<()> {
    match &args.command {
        Command::Slices(slices_args) => plan_slices(slices_args, &args),
        Command::Search(search_args) => run_search(search_args, &args),
    }
}

/// Print the slice plan for the given segment sizes.
fn plan_slices(args: &SlicesArgs, cli_args: &PhalanxArgs) -> Result<()> {
    if args.max_docs_per_slice == 0 || args.max_segments_per_slice == 0 {
        return Err(PhalanxError::invalid_argument(
            "slice caps must be greater than 0",
        ));
    }

    let mut next_base: u64 = 0;
    let mut segments: Vec<SegmentRef> = Vec::with_capacity(args.doc_counts.len());
    for (i, &doc_count) in args.doc_counts.iter().enumerate() {
        let doc_base = u32::try_from(next_base).map_err(|_| {
            PhalanxError::invalid_argument("total document count exceeds the doc id space")
        })?;
        segments.push(Arc::new(
            MemorySegment::with_doc_count(format!("seg-{i}"), doc_count).with_doc_base(doc_base),
        ));
        next_base += doc_count as u64;
    }

    let plan = if args.sequential {
        slices(
            &segments,
            args.max_docs_per_slice,
            args.max_segments_per_slice,
            Some(&NeverProceed as &dyn SliceAllocationCircuitBreaker),
        )
    } else {
        slices(
            &segments,
            args.max_docs_per_slice,
            args.max_segments_per_slice,
            None,
        )
    };

    let result = SlicePlanResult {
        total_segments: segments.len(),
        total_docs: next_base,
        slices: plan
            .iter()
            .enumerate()
            .map(|(index, slice)| SliceReport {
                index,
                segments: slice.segments().iter().map(|s| s.id().to_string()).collect(),
                doc_count: slice.doc_count(),
            })
            .collect(),
    };

    output_result("Slice plan computed", &result, cli_args)
}

/// Run a search over synthetic segments.
fn run_search(args: &SearchArgs, cli_args: &PhalanxArgs) -> Result<()> {
    let config = build_config(args)?;
    let sort: Sort = args.sort.parse()?;
    let index_sort = args.index_sort.as_deref().map(str::parse::<Sort>).transpose()?;

    let segments = build_segments(args, index_sort.as_ref())?;
    let engine = ParallelSearchEngine::new(config)?;
    let slice_count = engine.slices(&segments).len();

    let query: Arc<dyn Query> = match args.query {
        QueryKind::MatchAll => Arc::new(MatchAllQuery::new()),
        QueryKind::Rating => Arc::new(FieldScoreQuery::new("rating")),
        QueryKind::Price => Arc::new(FieldScoreQuery::new("price")),
    };

    let mut options = SearchOptions::new(args.top_k).with_sort(sort);
    if let Some(threshold) = args.total_hits_threshold {
        options = options.with_total_hits_threshold(threshold);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(query_id) = &args.query_id {
        options = options.with_query_id(query_id.clone());
    }

    let repeat = args.repeat.max(1);
    let start = Instant::now();
    let mut outcome = engine.search(Arc::clone(&query), &segments, options.clone())?;
    for _ in 1..repeat {
        outcome = engine.search(Arc::clone(&query), &segments, options.clone())?;
    }
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0 / repeat as f64;
    info!(
        "Ran {} {repeat} time(s) over {} segments, {duration_ms:.3}ms per search",
        query.description(),
        segments.len()
    );

    let mut result = SearchResult {
        query_id: args.query_id.clone(),
        status: String::new(),
        slices: slice_count,
        hits: Vec::new(),
        total_hits: 0,
        total_hits_relation: TotalHitsRelation::EqualTo,
        failures: Vec::new(),
        duration_ms,
        metrics: engine.config().enable_metrics.then(|| engine.metrics()),
    };

    match outcome {
        SearchOutcome::Completed(top_docs) => {
            result.status = "completed".to_string();
            fill_hits(&mut result, top_docs);
        }
        SearchOutcome::PartialFailure {
            failures,
            succeeded,
        } => {
            result.status = format!("partial failure ({succeeded} slices succeeded)");
            result.failures = failures
                .iter()
                .map(|f| format!("slice {}: {}", f.slice, f.error))
                .collect();
        }
        SearchOutcome::Cancelled { query_id, reason } => {
            result.status = format!("cancelled ({reason})");
            result.query_id = Some(query_id);
        }
    }

    output_result("Search finished", &result, cli_args)
}

fn fill_hits(result: &mut SearchResult, top_docs: TopDocs) {
    result.total_hits = top_docs.total_hits.value;
    result.total_hits_relation = top_docs.total_hits.relation;
    result.hits = top_docs
        .score_docs
        .into_iter()
        .map(|sd| HitReport {
            doc: sd.doc,
            score: sd.score,
            sort_values: sd.sort_values,
        })
        .collect();
}

/// Load the configuration file, if any, and apply command line overrides.
fn build_config(args: &SearchArgs) -> Result<ParallelSearchConfig> {
    let mut config = match &args.config {
        Some(path) => ParallelSearchConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => ParallelSearchConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.thread_pool_size = Some(threads);
    }
    if let Some(control_plane) = &args.control_plane {
        config.control_plane = control_plane.parse::<ControlPlaneType>()?;
    }
    if let Some(max_docs) = args.max_docs_per_slice {
        config.max_docs_per_slice = max_docs;
    }
    if let Some(max_segments) = args.max_segments_per_slice {
        config.max_segments_per_slice = max_segments;
    }
    config.validate()?;
    Ok(config)
}

/// Generate `args.segments` segments of roughly `args.docs_per_segment`
/// documents each, with `price`, `rating` and `category` fields.
pub fn build_segments(args: &SearchArgs, index_sort: Option<&Sort>) -> Result<Vec<SegmentRef>> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let average = args.docs_per_segment.max(1);
    let mut next_base: u64 = 0;
    let mut segments: Vec<SegmentRef> = Vec::with_capacity(args.segments);

    for i in 0..args.segments {
        let doc_count = rng.random_range(average / 2..=average + average / 2).max(1);
        let doc_base = u32::try_from(next_base).map_err(|_| {
            PhalanxError::invalid_argument("total document count exceeds the doc id space")
        })?;

        let mut builder = MemorySegment::builder(format!("seg-{i}")).doc_base(doc_base);
        if let Some(sort) = index_sort {
            builder = builder.index_sort(sort.clone());
        }
        for _ in 0..doc_count {
            let category = CATEGORIES[rng.random_range(0..CATEGORIES.len())];
            // A tenth of the documents have no rating.
            let rating = if rng.random_bool(0.9) {
                SortValue::Double((rng.random_range(0.0..5.0_f64) * 10.0).round() / 10.0)
            } else {
                SortValue::Null
            };
            builder.push_document([
                ("price", SortValue::Long(rng.random_range(1..10_000))),
                ("rating", rating),
                ("category", SortValue::Text(category.to_string())),
            ]);
        }

        segments.push(Arc::new(builder.build()?));
        next_base += doc_count as u64;
    }

    Ok(segments)
}
