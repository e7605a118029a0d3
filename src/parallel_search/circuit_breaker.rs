//! Admission gate deciding whether a query may be split into parallel
//! slices at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A predicate evaluated once per query before slicing. Returning `false`
/// forces a single slice holding every segment.
pub trait SliceAllocationCircuitBreaker: Send + Sync {
    /// Whether parallel slicing may proceed.
    fn should_proceed(&self) -> bool;
}

impl<F> SliceAllocationCircuitBreaker for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_proceed(&self) -> bool {
        self()
    }
}

/// Always allows parallel slicing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

impl SliceAllocationCircuitBreaker for AlwaysProceed {
    fn should_proceed(&self) -> bool {
        true
    }
}

/// Never allows parallel slicing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverProceed;

impl SliceAllocationCircuitBreaker for NeverProceed {
    fn should_proceed(&self) -> bool {
        false
    }
}

/// Denies parallel slicing while more than `max_in_flight` queries are
/// running. Queries hold an [`InFlightPermit`] for their whole lifetime.
#[derive(Debug)]
pub struct InFlightQueryCircuitBreaker {
    max_in_flight: usize,
    in_flight: AtomicUsize,
}

impl InFlightQueryCircuitBreaker {
    /// Create a breaker allowing up to `max_in_flight` parallel queries.
    pub fn new(max_in_flight: usize) -> Self {
        InFlightQueryCircuitBreaker {
            max_in_flight,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Count a query as running until the permit is dropped.
    pub fn acquire(self: &Arc<Self>) -> InFlightPermit {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightPermit {
            breaker: Arc::clone(self),
        }
    }

    /// Number of queries currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The configured limit.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl SliceAllocationCircuitBreaker for InFlightQueryCircuitBreaker {
    fn should_proceed(&self) -> bool {
        // The asking query holds a permit itself.
        self.in_flight() <= self.max_in_flight
    }
}

/// RAII registration of one running query.
#[derive(Debug)]
pub struct InFlightPermit {
    breaker: Arc<InFlightQueryCircuitBreaker>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.breaker.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
