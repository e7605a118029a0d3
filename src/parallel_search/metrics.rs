//! Metrics collection for parallel search operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Snapshot of the engine counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMetrics {
    /// Total number of searches executed.
    pub total_searches: u64,

    /// Searches where every slice succeeded.
    pub completed_searches: u64,

    /// Searches where at least one slice failed.
    pub partial_failures: u64,

    /// Searches that were cancelled or timed out.
    pub cancelled_searches: u64,

    /// Slice tasks executed.
    pub slices_executed: u64,

    /// Slice tasks that ran on the thread that issued the search.
    pub caller_thread_executions: u64,

    /// Slices in which at least one segment was cut short.
    pub early_terminated_slices: u64,

    /// Segments fully or partially scanned.
    pub segments_searched: u64,

    /// Segments cut short by early termination.
    pub segments_terminated: u64,

    /// Total hits returned to callers.
    pub total_hits_returned: u64,

    /// Total execution time across all searches.
    pub total_execution_time: Duration,

    /// Average execution time per search.
    pub avg_execution_time: Duration,

    /// Maximum execution time observed.
    pub max_execution_time: Duration,

    /// Minimum execution time observed.
    pub min_execution_time: Duration,
}

/// How a search ended, for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Every slice succeeded.
    Completed,
    /// At least one slice failed.
    PartialFailure,
    /// Cancelled or timed out.
    Cancelled,
}

/// Per-search execution counts fed into the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Slice tasks run.
    pub slices: u64,
    /// Slice tasks run on the caller thread.
    pub caller_executions: u64,
    /// Slices that early terminated.
    pub early_terminated_slices: u64,
    /// Segments scanned.
    pub segments_searched: u64,
    /// Segments cut short.
    pub segments_terminated: u64,
    /// Hits returned.
    pub hits_returned: u64,
}

/// Lock-free collector for engine metrics.
#[derive(Debug)]
pub struct SearchMetricsCollector {
    total_searches: AtomicU64,
    completed_searches: AtomicU64,
    partial_failures: AtomicU64,
    cancelled_searches: AtomicU64,
    slices_executed: AtomicU64,
    caller_thread_executions: AtomicU64,
    early_terminated_slices: AtomicU64,
    segments_searched: AtomicU64,
    segments_terminated: AtomicU64,
    total_hits_returned: AtomicU64,
    total_execution_nanos: AtomicU64,
    max_execution_nanos: AtomicU64,
    min_execution_nanos: AtomicU64,

    start_time: Instant,
}

impl SearchMetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            total_searches: AtomicU64::new(0),
            completed_searches: AtomicU64::new(0),
            partial_failures: AtomicU64::new(0),
            cancelled_searches: AtomicU64::new(0),
            slices_executed: AtomicU64::new(0),
            caller_thread_executions: AtomicU64::new(0),
            early_terminated_slices: AtomicU64::new(0),
            segments_searched: AtomicU64::new(0),
            segments_terminated: AtomicU64::new(0),
            total_hits_returned: AtomicU64::new(0),
            total_execution_nanos: AtomicU64::new(0),
            max_execution_nanos: AtomicU64::new(0),
            min_execution_nanos: AtomicU64::new(u64::MAX),
            start_time: Instant::now(),
        }
    }

    /// Record a finished search.
    pub fn record_search(
        &self,
        execution_time: Duration,
        status: SearchStatus,
        stats: &ExecutionStats,
    ) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
        let outcome_counter = match status {
            SearchStatus::Completed => &self.completed_searches,
            SearchStatus::PartialFailure => &self.partial_failures,
            SearchStatus::Cancelled => &self.cancelled_searches,
        };
        outcome_counter.fetch_add(1, Ordering::Relaxed);

        self.slices_executed.fetch_add(stats.slices, Ordering::Relaxed);
        self.caller_thread_executions
            .fetch_add(stats.caller_executions, Ordering::Relaxed);
        self.early_terminated_slices
            .fetch_add(stats.early_terminated_slices, Ordering::Relaxed);
        self.segments_searched
            .fetch_add(stats.segments_searched, Ordering::Relaxed);
        self.segments_terminated
            .fetch_add(stats.segments_terminated, Ordering::Relaxed);
        self.total_hits_returned
            .fetch_add(stats.hits_returned, Ordering::Relaxed);

        let nanos = u64::try_from(execution_time.as_nanos()).unwrap_or(u64::MAX);
        self.total_execution_nanos
            .fetch_add(nanos, Ordering::Relaxed);
        update_max(&self.max_execution_nanos, nanos);
        update_min(&self.min_execution_nanos, nanos);
    }

    /// Get the current metrics snapshot.
    pub fn snapshot(&self) -> SearchMetrics {
        let total_searches = self.total_searches.load(Ordering::Relaxed);
        let total_nanos = self.total_execution_nanos.load(Ordering::Relaxed);

        let avg_nanos = if total_searches > 0 {
            total_nanos / total_searches
        } else {
            0
        };

        let min_nanos = self.min_execution_nanos.load(Ordering::Relaxed);
        let min_duration = if min_nanos == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_nanos(min_nanos)
        };

        SearchMetrics {
            total_searches,
            completed_searches: self.completed_searches.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            cancelled_searches: self.cancelled_searches.load(Ordering::Relaxed),
            slices_executed: self.slices_executed.load(Ordering::Relaxed),
            caller_thread_executions: self.caller_thread_executions.load(Ordering::Relaxed),
            early_terminated_slices: self.early_terminated_slices.load(Ordering::Relaxed),
            segments_searched: self.segments_searched.load(Ordering::Relaxed),
            segments_terminated: self.segments_terminated.load(Ordering::Relaxed),
            total_hits_returned: self.total_hits_returned.load(Ordering::Relaxed),
            total_execution_time: Duration::from_nanos(total_nanos),
            avg_execution_time: Duration::from_nanos(avg_nanos),
            max_execution_time: Duration::from_nanos(
                self.max_execution_nanos.load(Ordering::Relaxed),
            ),
            min_execution_time: min_duration,
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.total_searches,
            &self.completed_searches,
            &self.partial_failures,
            &self.cancelled_searches,
            &self.slices_executed,
            &self.caller_thread_executions,
            &self.early_terminated_slices,
            &self.segments_searched,
            &self.segments_terminated,
            &self.total_hits_returned,
            &self.total_execution_nanos,
            &self.max_execution_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_execution_nanos.store(u64::MAX, Ordering::Relaxed);
    }

    /// Get the uptime of this collector.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for SearchMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

fn update_min(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value < current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// Helper for timing operations.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return elapsed time.
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn stats(slices: u64, caller: u64, hits: u64) -> ExecutionStats {
        ExecutionStats {
            slices,
            caller_executions: caller,
            hits_returned: hits,
            ..Default::default()
        }
    }

    #[test]
    fn test_metrics_collection() {
        let collector = SearchMetricsCollector::new();

        collector.record_search(Duration::from_millis(100), SearchStatus::Completed, &stats(3, 1, 10));
        collector.record_search(Duration::from_millis(50), SearchStatus::Completed, &stats(2, 1, 5));
        collector.record_search(Duration::from_millis(200), SearchStatus::PartialFailure, &stats(4, 2, 0));
        collector.record_search(Duration::from_millis(20), SearchStatus::Cancelled, &stats(1, 1, 0));

        let metrics = collector.snapshot();

        assert_eq!(metrics.total_searches, 4);
        assert_eq!(metrics.completed_searches, 2);
        assert_eq!(metrics.partial_failures, 1);
        assert_eq!(metrics.cancelled_searches, 1);
        assert_eq!(metrics.slices_executed, 10);
        assert_eq!(metrics.caller_thread_executions, 5);
        assert_eq!(metrics.total_hits_returned, 15);

        assert_eq!(metrics.min_execution_time, Duration::from_millis(20));
        assert_eq!(metrics.max_execution_time, Duration::from_millis(200));
        assert_eq!(metrics.avg_execution_time, Duration::from_nanos(92_500_000));
    }

    #[test]
    fn test_reset() {
        let collector = SearchMetricsCollector::new();
        collector.record_search(Duration::from_millis(5), SearchStatus::Completed, &stats(1, 1, 1));
        collector.reset();
        let metrics = collector.snapshot();
        assert_eq!(metrics.total_searches, 0);
        assert_eq!(metrics.min_execution_time, Duration::ZERO);
        assert_eq!(metrics.max_execution_time, Duration::ZERO);
    }

    #[test]
    fn test_concurrent_min_max() {
        let collector = Arc::new(SearchMetricsCollector::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|t| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        collector.record_search(
                            Duration::from_micros(t * 1000 + i),
                            SearchStatus::Completed,
                            &ExecutionStats::default(),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let metrics = collector.snapshot();
        assert_eq!(metrics.total_searches, 800);
        assert_eq!(metrics.min_execution_time, Duration::from_micros(1000));
        assert_eq!(metrics.max_execution_time, Duration::from_micros(8099));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(10));
        let elapsed = timer.stop();

        assert!(elapsed >= Duration::from_millis(10));
    }
}
