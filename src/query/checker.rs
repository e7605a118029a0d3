//! Rank state shared by the per-slice collectors of one query.
//!
//! All mutation goes through atomic read-modify-write loops: the shared
//! bottom value only ever moves towards "stricter", and concurrent updates
//! are never lost. Readers may observe a stale bound but never a torn or
//! regressed one.

use std::cmp::Ordering as CmpOrdering;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

use crate::query::sort::{Sort, SortValue, can_early_terminate};

/// A monotonic bound shared across worker threads.
pub trait BottomValueChecker: Send + Sync + Debug {
    /// The bound's value type.
    type Value;

    /// Offer a slice-local bottom value. Returns `true` if it became the new
    /// shared bound, `false` if the current bound was already at least as
    /// strict.
    fn update_thread_local_bottom_value(&self, value: Self::Value) -> bool;

    /// The current shared bound, if any slice has published one.
    fn bottom_value(&self) -> Option<Self::Value>;
}

/// Maintains the global bottom score as the maximum of all published
/// slice-local bottom scores.
///
/// The score is stored as its `f32` bit pattern in an `AtomicU32`.
#[derive(Debug)]
pub struct MaxBottomScoreChecker {
    bits: AtomicU32,
}

impl MaxBottomScoreChecker {
    /// Create a checker with no published bound.
    pub fn new() -> Self {
        MaxBottomScoreChecker {
            bits: AtomicU32::new(f32::NEG_INFINITY.to_bits()),
        }
    }
}

impl Default for MaxBottomScoreChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl BottomValueChecker for MaxBottomScoreChecker {
    type Value = f32;

    fn update_thread_local_bottom_value(&self, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if f32::from_bits(current).total_cmp(&value) != CmpOrdering::Less {
                return false;
            }
            match self.bits.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn bottom_value(&self) -> Option<f32> {
        let value = f32::from_bits(self.bits.load(Ordering::Acquire));
        if value == f32::NEG_INFINITY {
            None
        } else {
            Some(value)
        }
    }
}

/// The worst entry of a full slice-local top-K, under a composite sort.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBottom {
    /// One value per sort field.
    pub sort_values: Vec<SortValue>,
    /// Global doc id of the entry.
    pub doc: u32,
}

/// Generalizes the bottom score to multi-field sorts: keeps the strictest
/// (best ranked) of the published slice-local bottom entries.
#[derive(Debug)]
pub struct FieldValueChecker {
    sort: Sort,
    bottom: ArcSwapOption<FieldBottom>,
}

impl FieldValueChecker {
    /// Create a checker for `sort` with no published bound.
    pub fn new(sort: Sort) -> Self {
        FieldValueChecker {
            sort,
            bottom: ArcSwapOption::empty(),
        }
    }

    /// The sort this checker compares with.
    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Whether collectors ranking by `sort` can share this checker.
    pub fn accepts_sort(&self, sort: &Sort) -> bool {
        sort.is_prefix_of(&self.sort) && self.sort.is_prefix_of(sort)
    }

    /// Whether segments ordered by `index_sort` let collectors using this
    /// checker's sort stop early.
    pub fn can_early_terminate(&self, index_sort: Option<&Sort>) -> bool {
        can_early_terminate(&self.sort, index_sort)
    }

    /// Whether an entry could still enter the global top-K: it must not rank
    /// strictly after the shared bound.
    pub fn is_competitive(&self, sort_values: &[SortValue], doc: u32) -> bool {
        match self.bottom.load_full() {
            Some(bottom) => {
                self.sort
                    .compare_ranked(sort_values, doc, &bottom.sort_values, bottom.doc)
                    != CmpOrdering::Greater
            }
            None => true,
        }
    }

    fn is_stricter(&self, candidate: &FieldBottom, current: &FieldBottom) -> bool {
        self.sort.compare_ranked(
            &candidate.sort_values,
            candidate.doc,
            &current.sort_values,
            current.doc,
        ) == CmpOrdering::Less
    }
}

impl BottomValueChecker for FieldValueChecker {
    type Value = Arc<FieldBottom>;

    fn update_thread_local_bottom_value(&self, value: Arc<FieldBottom>) -> bool {
        loop {
            let current = self.bottom.load_full();
            if let Some(current) = &current {
                if !self.is_stricter(&value, current) {
                    return false;
                }
            }
            let previous = self
                .bottom
                .compare_and_swap(&current, Some(Arc::clone(&value)));
            let swapped = match (&*previous, &current) {
                (Some(p), Some(c)) => Arc::ptr_eq(p, c),
                (None, None) => true,
                _ => false,
            };
            if swapped {
                return true;
            }
        }
    }

    fn bottom_value(&self) -> Option<Arc<FieldBottom>> {
        self.bottom.load_full()
    }
}

/// Counts hits and tells collectors when enough have been seen for early
/// termination to be meaningful.
///
/// Share one instance (behind an `Arc`) across all slices of a query for a
/// query-wide count, or give each collector its own for a local count.
#[derive(Debug)]
pub struct HitsThresholdChecker {
    threshold: u64,
    hits: AtomicU64,
}

impl HitsThresholdChecker {
    /// Create a checker that is reached once more than `threshold` hits
    /// were counted.
    pub fn new(threshold: u64) -> Self {
        HitsThresholdChecker {
            threshold,
            hits: AtomicU64::new(0),
        }
    }

    /// Create a checker meant to be shared across slices.
    pub fn shared(threshold: u64) -> Arc<Self> {
        Arc::new(Self::new(threshold))
    }

    /// Count one hit.
    pub fn increment_hit_count(&self) {
        self.hits.fetch_add(1, Ordering::AcqRel);
    }

    /// Hits counted so far.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    /// The configured threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether strictly more than `threshold` hits were counted.
    pub fn is_threshold_reached(&self) -> bool {
        self.hit_count() > self.threshold
    }
}

/// The shared bound appropriate for a query's sort.
#[derive(Debug, Clone)]
pub enum RankBound {
    /// Plain relevance sort.
    Score(Arc<MaxBottomScoreChecker>),
    /// Any other sort.
    Fields(Arc<FieldValueChecker>),
}

/// Per-query shared rank state, created at query start and passed to every
/// slice task explicitly.
#[derive(Debug, Clone)]
pub struct SharedRankState {
    hits: Arc<HitsThresholdChecker>,
    bound: RankBound,
}

impl SharedRankState {
    /// Build the state for a query ranking by `sort` and returning `top_k`
    /// hits. The effective hits threshold is never below `top_k`.
    pub fn new(sort: &Sort, top_k: usize, total_hits_threshold: u64) -> Self {
        let threshold = total_hits_threshold.max(top_k as u64);
        let bound = if sort.is_relevance() {
            RankBound::Score(Arc::new(MaxBottomScoreChecker::new()))
        } else {
            RankBound::Fields(Arc::new(FieldValueChecker::new(sort.clone())))
        };
        SharedRankState {
            hits: HitsThresholdChecker::shared(threshold),
            bound,
        }
    }

    /// The shared hits counter.
    pub fn hits(&self) -> &Arc<HitsThresholdChecker> {
        &self.hits
    }

    /// The shared bottom-value bound.
    pub fn bound(&self) -> &RankBound {
        &self.bound
    }
}
