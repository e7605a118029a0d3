//! Parallel search module for executing a query across the segments of an
//! index concurrently.
//!
//! This module provides functionality to:
//! - Partition segments into slices of bounded size
//! - Dispatch one task per slice through a pluggable control plane
//! - Share rank state between slices so they prune each other's candidates
//! - Cancel running queries by identifier or deadline
//! - Merge slice results and monitor performance metrics

pub mod cancellation;
pub mod circuit_breaker;
pub mod config;
pub mod control_plane;
pub mod engine;
pub mod merger;
pub mod metrics;
pub mod pool;
pub mod search_task;
pub mod slicer;

pub use cancellation::{CancelReason, CancellationToken, QueryRegistration, QueryRegistry};
pub use circuit_breaker::{
    AlwaysProceed, InFlightPermit, InFlightQueryCircuitBreaker, NeverProceed,
    SliceAllocationCircuitBreaker,
};
pub use config::{ControlPlaneType, ParallelSearchConfig, SearchOptions};
pub use control_plane::{
    ControlPlaneFactory, ExecutionControlPlane, QueueSizeBasedControlPlane, RayonControlPlane,
    SequentialControlPlane, SliceExecutionControlPlane,
};
pub use engine::{ParallelSearchEngine, SearchOutcome, SliceFailure};
pub use merger::{TopDocsMerger, merge_top_docs};
pub use metrics::{SearchMetrics, SearchMetricsCollector};
pub use pool::{Task, TaskFuture, WorkerPool};
pub use search_task::{SliceResult, SliceSearchTask, TaskStatus};
pub use slicer::{LeafSlice, slices};
