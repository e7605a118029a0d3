//! Main parallel search engine implementation.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PhalanxError, Result};
use crate::parallel_search::cancellation::{CancelReason, QueryRegistry};
use crate::parallel_search::circuit_breaker::{
    InFlightQueryCircuitBreaker, SliceAllocationCircuitBreaker,
};
use crate::parallel_search::config::{ParallelSearchConfig, SearchOptions};
use crate::parallel_search::control_plane::{ControlPlaneFactory, ExecutionControlPlane};
use crate::parallel_search::merger::merge_top_docs;
use crate::parallel_search::metrics::{
    ExecutionStats, SearchMetrics, SearchMetricsCollector, SearchStatus, Timer,
};
use crate::parallel_search::pool::Task;
use crate::parallel_search::search_task::{SliceResult, SliceSearchTask};
use crate::parallel_search::slicer::{LeafSlice, slices};
use crate::query::checker::SharedRankState;
use crate::query::query::Query;
use crate::query::sort::Sort;
use crate::query::top_docs::TopDocs;
use crate::segment::{SegmentRef, check_doc_range};

/// A slice whose task failed.
#[derive(Debug)]
pub struct SliceFailure {
    /// Position of the slice in the slice plan.
    pub slice: usize,
    /// Why it failed.
    pub error: PhalanxError,
}

/// How a search ended.
#[derive(Debug)]
pub enum SearchOutcome {
    /// Every slice succeeded and the results were merged.
    Completed(TopDocs),

    /// At least one slice failed. No results are returned.
    PartialFailure {
        /// The failed slices.
        failures: Vec<SliceFailure>,
        /// Number of slices that succeeded.
        succeeded: usize,
    },

    /// The query was cancelled or timed out. Slice results were discarded.
    Cancelled {
        /// Identifier of the cancelled query.
        query_id: String,
        /// Why it was cancelled.
        reason: CancelReason,
    },
}

impl SearchOutcome {
    /// Whether every slice succeeded.
    pub fn is_completed(&self) -> bool {
        matches!(self, SearchOutcome::Completed(_))
    }

    /// Whether the query was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchOutcome::Cancelled { .. })
    }

    /// The merged results of a completed search.
    pub fn top_docs(&self) -> Option<&TopDocs> {
        match self {
            SearchOutcome::Completed(top_docs) => Some(top_docs),
            _ => None,
        }
    }

    /// Turn the outcome into results, failing on anything but completion.
    pub fn into_top_docs(self) -> Result<TopDocs> {
        match self {
            SearchOutcome::Completed(top_docs) => Ok(top_docs),
            SearchOutcome::PartialFailure { mut failures, .. } => match failures.len() {
                1 => Err(failures.remove(0).error),
                n => Err(PhalanxError::other(format!("{n} slices failed"))),
            },
            SearchOutcome::Cancelled { query_id, reason } => Err(PhalanxError::cancelled(
                format!("query {query_id} {reason}"),
            )),
        }
    }
}

/// Executes queries over segments by slicing them and searching the slices
/// concurrently.
pub struct ParallelSearchEngine {
    /// Configuration for the engine.
    config: ParallelSearchConfig,

    /// Dispatches slice tasks.
    control_plane: Box<dyn ExecutionControlPlane<SliceResult>>,

    /// Admission gates consulted before slicing; all must agree.
    breakers: Vec<Arc<dyn SliceAllocationCircuitBreaker>>,

    /// In-flight query gate, when configured.
    in_flight: Option<Arc<InFlightQueryCircuitBreaker>>,

    /// Running queries by id.
    registry: Arc<QueryRegistry>,

    /// Metrics collector.
    metrics: Arc<SearchMetricsCollector>,
}

impl ParallelSearchEngine {
    /// Create a new parallel search engine.
    pub fn new(config: ParallelSearchConfig) -> Result<Self> {
        config.validate()?;
        let control_plane = ControlPlaneFactory::create(&config)?;

        let in_flight = config
            .max_in_flight_queries
            .map(|max| Arc::new(InFlightQueryCircuitBreaker::new(max)));
        let mut breakers: Vec<Arc<dyn SliceAllocationCircuitBreaker>> = Vec::new();
        if let Some(in_flight) = &in_flight {
            breakers.push(Arc::clone(in_flight) as Arc<dyn SliceAllocationCircuitBreaker>);
        }

        info!(
            "Created parallel search engine: control_plane={}, threads={}, max_docs_per_slice={}, max_segments_per_slice={}",
            control_plane.name(),
            config.pool_size(),
            config.max_docs_per_slice,
            config.max_segments_per_slice
        );

        Ok(Self {
            config,
            control_plane,
            breakers,
            in_flight,
            registry: Arc::new(QueryRegistry::new()),
            metrics: Arc::new(SearchMetricsCollector::new()),
        })
    }

    /// Add an admission gate consulted before every query is sliced.
    pub fn with_circuit_breaker<B>(mut self, breaker: B) -> Self
    where
        B: SliceAllocationCircuitBreaker + 'static,
    {
        self.breakers.push(Arc::new(breaker));
        self
    }

    /// Replace the control plane chosen from the configuration.
    pub fn with_control_plane(
        mut self,
        control_plane: Box<dyn ExecutionControlPlane<SliceResult>>,
    ) -> Self {
        self.control_plane = control_plane;
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &ParallelSearchConfig {
        &self.config
    }

    /// The slice plan a query over `segments` would use right now.
    pub fn slices(&self, segments: &[SegmentRef]) -> Vec<LeafSlice> {
        let gate = || self.breakers.iter().all(|b| b.should_proceed());
        let gate: &dyn SliceAllocationCircuitBreaker = &gate;
        slices(
            segments,
            self.config.max_docs_per_slice,
            self.config.max_segments_per_slice,
            Some(gate),
        )
    }

    /// Cancel the running query `query_id`. Returns whether such a query was
    /// running.
    pub fn cancel(&self, query_id: &str) -> Result<bool> {
        self.registry.cancel(query_id)
    }

    /// Identifiers of the queries currently running.
    pub fn running_queries(&self) -> Vec<String> {
        self.registry.running_queries()
    }

    /// Execute `query` over `segments`.
    ///
    /// Invalid options are returned as an error before any task runs. Slice
    /// failures and cancellation are reported through [`SearchOutcome`].
    pub fn search(
        &self,
        query: Arc<dyn Query>,
        segments: &[SegmentRef],
        options: SearchOptions,
    ) -> Result<SearchOutcome> {
        options.validate()?;
        validate_segments(segments, &options.sort)?;
        let timer = Timer::start();

        let query_id = options
            .query_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = options.timeout.or(self.config.default_timeout);
        let registration = self.registry.register(&query_id, timeout)?;
        let token = registration.token().clone();
        let _permit = self.in_flight.as_ref().map(|b| b.acquire());

        let slices = self.slices(segments);
        debug!(
            "Query {query_id} ({}) over {} segments in {} slices, sort={}, top_k={}",
            query.description(),
            segments.len(),
            slices.len(),
            options.sort,
            options.top_k
        );

        let threshold = options
            .total_hits_threshold
            .unwrap_or(self.config.total_hits_threshold);
        let state = SharedRankState::new(&options.sort, options.top_k, threshold);
        let sort = Arc::new(options.sort.clone());

        let tasks: Vec<Task<SliceResult>> = slices
            .into_iter()
            .enumerate()
            .map(|(i, slice)| {
                let task = SliceSearchTask::new(
                    i,
                    slice,
                    Arc::clone(&query),
                    Arc::clone(&sort),
                    options.top_k,
                    state.clone(),
                    token.clone(),
                );
                Box::new(move || task.run()) as Task<SliceResult>
            })
            .collect();

        let futures = self.control_plane.invoke_all(tasks);
        let mut stats = ExecutionStats {
            slices: futures.len() as u64,
            caller_executions: futures.iter().filter(|f| f.executed_on_caller()).count() as u64,
            ..Default::default()
        };

        let mut results = Vec::with_capacity(futures.len());
        let mut failures = Vec::new();
        for (slice, future) in futures.into_iter().enumerate() {
            match future.wait() {
                Ok(result) => {
                    stats.segments_searched += result.segments_searched as u64;
                    stats.segments_terminated += result.segments_terminated as u64;
                    stats.early_terminated_slices += u64::from(result.early_terminated);
                    results.push(result);
                }
                Err(error) => failures.push(SliceFailure {
                    slice,
                    error: match error {
                        e @ (PhalanxError::SliceExecution { .. }
                        | PhalanxError::OperationCancelled(_)) => e,
                        e => PhalanxError::slice_execution(slice, e.to_string()),
                    },
                }),
            }
        }

        let (outcome, status) = if let Some(reason) = token.signalled_reason() {
            info!("Query {query_id} cancelled ({reason}), discarding slice results");
            (SearchOutcome::Cancelled { query_id, reason }, SearchStatus::Cancelled)
        } else if !failures.is_empty() {
            for failure in &failures {
                warn!("Query {query_id}: {}", failure.error);
            }
            let succeeded = results.len();
            (
                SearchOutcome::PartialFailure {
                    failures,
                    succeeded,
                },
                SearchStatus::PartialFailure,
            )
        } else {
            let shards: Vec<TopDocs> = results.into_iter().map(|r| r.top_docs).collect();
            let top_docs = merge_top_docs(&options.sort, options.top_k, &shards);
            stats.hits_returned = top_docs.len() as u64;
            (SearchOutcome::Completed(top_docs), SearchStatus::Completed)
        };
        drop(registration);

        if self.config.enable_metrics && options.collect_metrics {
            self.metrics.record_search(timer.stop(), status, &stats);
        }
        Ok(outcome)
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> SearchMetrics {
        self.metrics.snapshot()
    }

    /// Reset metrics.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

/// Reject segments a query sorted by `sort` cannot run over: doc ranges past
/// the doc id space, and sort fields whose column holds another value type.
fn validate_segments(segments: &[SegmentRef], sort: &Sort) -> Result<()> {
    for segment in segments {
        check_doc_range(segment.as_ref())?;
        for field in sort.fields() {
            let Some(name) = field.field().filter(|_| field.field_type().is_field_backed()) else {
                continue;
            };
            if let Some(values) = segment.doc_values(name) {
                if values.value_type() != field.field_type() {
                    return Err(PhalanxError::invalid_argument(format!(
                        "cannot sort field '{name}' as {:?}, segment {} holds {:?} values",
                        field.field_type(),
                        segment.id(),
                        values.value_type()
                    )));
                }
            }
        }
    }
    Ok(())
}

impl fmt::Debug for ParallelSearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelSearchEngine")
            .field("config", &self.config)
            .field("control_plane", &self.control_plane.name())
            .field("breakers", &self.breakers.len())
            .field("running_queries", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel_search::circuit_breaker::NeverProceed;
    use crate::parallel_search::config::ControlPlaneType;
    use crate::query::query::MatchAllQuery;
    use crate::segment::MemorySegment;

    fn engine(plane: ControlPlaneType) -> ParallelSearchEngine {
        ParallelSearchEngine::new(ParallelSearchConfig {
            thread_pool_size: Some(2),
            control_plane: plane,
            max_docs_per_slice: 10,
            max_segments_per_slice: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn segments(counts: &[u32]) -> Vec<SegmentRef> {
        let mut base = 0;
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let segment = MemorySegment::with_doc_count(format!("s{i}"), count).with_doc_base(base);
                base += count;
                Arc::new(segment) as SegmentRef
            })
            .collect()
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine(ControlPlaneType::QueueSizeBased);
        assert!(engine.running_queries().is_empty());
        assert!(ParallelSearchEngine::new(ParallelSearchConfig {
            max_segments_per_slice: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_empty_search() {
        let engine = engine(ControlPlaneType::SliceBased);
        let outcome = engine
            .search(Arc::new(MatchAllQuery::new()), &[], SearchOptions::default())
            .unwrap();
        let top_docs = outcome.into_top_docs().unwrap();
        assert!(top_docs.is_empty());
        assert_eq!(top_docs.total_hits.value, 0);
    }

    #[test]
    fn test_search_across_slices() {
        for plane in [
            ControlPlaneType::QueueSizeBased,
            ControlPlaneType::SliceBased,
            ControlPlaneType::Rayon,
            ControlPlaneType::Sequential,
        ] {
            let engine = engine(plane);
            let segments = segments(&[4, 12, 3, 6]);
            assert!(engine.slices(&segments).len() > 1);

            let outcome = engine
                .search(
                    Arc::new(MatchAllQuery::new()),
                    &segments,
                    SearchOptions::new(5).with_total_hits_threshold(1000),
                )
                .unwrap();
            let top_docs = outcome.top_docs().unwrap();
            assert_eq!(top_docs.doc_ids(), vec![0, 1, 2, 3, 4], "{plane:?}");
            assert_eq!(top_docs.total_hits.value, 25);
        }
    }

    #[test]
    fn test_invalid_options_fail_synchronously() {
        let engine = engine(ControlPlaneType::Sequential);
        let result = engine.search(
            Arc::new(MatchAllQuery::new()),
            &segments(&[1]),
            SearchOptions::new(0),
        );
        assert!(matches!(result, Err(PhalanxError::InvalidArgument(_))));
        assert_eq!(engine.metrics().total_searches, 0);
    }

    #[test]
    fn test_unsearchable_segments_fail_synchronously() {
        let engine = engine(ControlPlaneType::QueueSizeBased);
        let query: Arc<dyn Query> = Arc::new(MatchAllQuery::new());

        let overflowing: Vec<SegmentRef> = vec![Arc::new(
            MemorySegment::with_doc_count("s0", 5).with_doc_base(u32::MAX - 1),
        )];
        let result = engine.search(Arc::clone(&query), &overflowing, SearchOptions::new(3));
        assert!(matches!(result, Err(PhalanxError::Segment(_))));

        let priced: Vec<SegmentRef> = vec![Arc::new(
            MemorySegment::builder("s1")
                .add_document([("price", crate::query::sort::SortValue::Long(3))])
                .build()
                .unwrap(),
        )];
        let wrong_type = SearchOptions::new(3).with_sort("price:double".parse().unwrap());
        let result = engine.search(Arc::clone(&query), &priced, wrong_type);
        assert!(matches!(result, Err(PhalanxError::InvalidArgument(_))));

        let right_type = SearchOptions::new(3).with_sort("price:long".parse().unwrap());
        assert!(engine.search(query, &priced, right_type).unwrap().is_completed());
        assert_eq!(engine.metrics().total_searches, 1);
    }

    #[test]
    fn test_circuit_breaker_forces_single_slice() {
        let engine = engine(ControlPlaneType::Sequential).with_circuit_breaker(NeverProceed);
        let segments = segments(&[4, 12, 3, 6]);
        assert_eq!(engine.slices(&segments).len(), 1);
    }

    #[test]
    fn test_metrics_collection() {
        let engine = engine(ControlPlaneType::Sequential);
        let segments = segments(&[4, 12, 3, 6]);
        engine
            .search(Arc::new(MatchAllQuery::new()), &segments, SearchOptions::new(3))
            .unwrap();
        engine
            .search(
                Arc::new(MatchAllQuery::new()),
                &segments,
                SearchOptions::new(3).with_metrics(false),
            )
            .unwrap();

        let metrics = engine.metrics();
        assert_eq!(metrics.total_searches, 1);
        assert_eq!(metrics.completed_searches, 1);
        assert_eq!(metrics.slices_executed, engine.slices(&segments).len() as u64);
        assert_eq!(metrics.caller_thread_executions, metrics.slices_executed);
        assert_eq!(metrics.total_hits_returned, 3);

        engine.reset_metrics();
        assert_eq!(engine.metrics().total_searches, 0);
    }
}
