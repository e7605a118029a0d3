//! Per-slice search task executed by a control plane.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::RwLock;

use crate::error::Result;
use crate::parallel_search::cancellation::CancellationToken;
use crate::parallel_search::slicer::LeafSlice;
use crate::query::checker::SharedRankState;
use crate::query::collector::{CollectAction, create_collector};
use crate::query::query::Query;
use crate::query::sort::Sort;
use crate::query::top_docs::TopDocs;

/// Number of collected documents between two cancellation checks.
pub const CANCELLATION_CHECK_INTERVAL: u32 = 1024;

/// Status of a task during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is queued for execution.
    Queued,

    /// Task is currently executing.
    Running,

    /// Task completed successfully.
    Completed,

    /// Task failed with an error.
    Failed,

    /// Task observed the query's cancellation.
    Cancelled,
}

/// Handle for tracking a slice task's progress from outside the task.
#[derive(Debug)]
pub struct TaskHandle {
    slice_index: usize,
    status: RwLock<TaskStatus>,
    start_time: RwLock<Option<Instant>>,
}

impl TaskHandle {
    /// Create a handle for a queued task.
    pub fn new(slice_index: usize) -> Self {
        Self {
            slice_index,
            status: RwLock::new(TaskStatus::Queued),
            start_time: RwLock::new(None),
        }
    }

    /// Slice the task searches.
    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    /// Get the current status.
    pub fn status(&self) -> TaskStatus {
        *self.status.read()
    }

    /// Set the status.
    pub fn set_status(&self, status: TaskStatus) {
        *self.status.write() = status;
    }

    /// Mark the task as started.
    pub fn start(&self) {
        self.set_status(TaskStatus::Running);
        *self.start_time.write() = Some(Instant::now());
    }

    /// Time since the task started, if it did.
    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.read().map(|start| start.elapsed())
    }
}

/// Output of one slice task.
#[derive(Debug, Clone)]
pub struct SliceResult {
    /// Position of the slice in the slice plan.
    pub slice_index: usize,

    /// Slice-local top-K, best first.
    pub top_docs: TopDocs,

    /// Segments opened by the task.
    pub segments_searched: usize,

    /// Segments cut short by early termination.
    pub segments_terminated: usize,

    /// Whether any segment was cut short.
    pub early_terminated: bool,
}

/// Searches the segments of one slice in `doc_base` order with a collector
/// wired to the query's shared rank state.
#[derive(Debug)]
pub struct SliceSearchTask {
    slice_index: usize,
    slice: LeafSlice,
    query: Arc<dyn Query>,
    sort: Arc<Sort>,
    top_k: usize,
    state: SharedRankState,
    token: CancellationToken,
    handle: Arc<TaskHandle>,
}

impl SliceSearchTask {
    /// Create a task for slice `slice_index`.
    pub fn new(
        slice_index: usize,
        slice: LeafSlice,
        query: Arc<dyn Query>,
        sort: Arc<Sort>,
        top_k: usize,
        state: SharedRankState,
        token: CancellationToken,
    ) -> Self {
        Self {
            slice_index,
            slice,
            query,
            sort,
            top_k,
            state,
            token,
            handle: Arc::new(TaskHandle::new(slice_index)),
        }
    }

    /// Handle observing this task.
    pub fn handle(&self) -> Arc<TaskHandle> {
        Arc::clone(&self.handle)
    }

    /// Run the task to completion.
    pub fn run(self) -> Result<SliceResult> {
        self.handle.start();
        let result = self.execute();
        let status = match &result {
            Ok(_) => TaskStatus::Completed,
            Err(e) if e.is_cancellation() => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        self.handle.set_status(status);
        trace!(
            "Slice {} finished as {:?} after {:?}",
            self.slice_index,
            status,
            self.handle.elapsed().unwrap_or_default()
        );
        result
    }

    fn execute(&self) -> Result<SliceResult> {
        let mut collector = create_collector(&self.sort, self.top_k, &self.state);
        let mut segments_searched = 0;
        let mut segments_terminated = 0;

        for segment in self.slice.segments() {
            self.token.check()?;
            collector.set_segment(segment.as_ref())?;
            let mut matcher = self.query.matcher(segment.as_ref())?;
            segments_searched += 1;

            let mut pushed_min_score: Option<f32> = None;
            let mut until_check = CANCELLATION_CHECK_INTERVAL;
            while matcher.next()? {
                if collector.collect(matcher.doc_id(), matcher.score())?
                    == CollectAction::TerminateSegment
                {
                    trace!(
                        "Slice {}: early terminating segment {} at doc {}",
                        self.slice_index,
                        segment.id(),
                        matcher.doc_id()
                    );
                    segments_terminated += 1;
                    break;
                }

                if let Some(min_score) = collector.min_competitive_score() {
                    if pushed_min_score
                        .is_none_or(|pushed| min_score.total_cmp(&pushed) == Ordering::Greater)
                    {
                        pushed_min_score = Some(min_score);
                        if matcher.set_min_competitive_score(min_score) {
                            collector.mark_total_hits_lower_bound();
                        }
                    }
                }

                until_check -= 1;
                if until_check == 0 {
                    until_check = CANCELLATION_CHECK_INTERVAL;
                    self.token.check()?;
                }
            }
        }

        Ok(SliceResult {
            slice_index: self.slice_index,
            top_docs: collector.top_docs(),
            segments_searched,
            segments_terminated,
            early_terminated: collector.is_early_terminated(),
        })
    }
}
