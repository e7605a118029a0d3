//! Partitioning of segments into slices, the unit of parallel work.
//!
//! Segments are packed largest first so that big segments do not end up
//! queued behind a run of tiny ones. Within a slice, segments are kept in
//! ascending `doc_base` order.

use std::fmt;

use log::debug;

use crate::parallel_search::circuit_breaker::SliceAllocationCircuitBreaker;
use crate::segment::SegmentRef;

/// A group of segments searched sequentially by one task.
#[derive(Clone)]
pub struct LeafSlice {
    segments: Vec<SegmentRef>,
}

impl LeafSlice {
    /// Create a slice, ordering its segments by ascending doc base.
    pub fn new(mut segments: Vec<SegmentRef>) -> Self {
        segments.sort_by_key(|s| s.doc_base());
        LeafSlice { segments }
    }

    /// Segments of this slice in search order.
    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the slice has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total documents over all segments.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count() as u64).sum()
    }
}

impl fmt::Debug for LeafSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafSlice")
            .field(
                "segments",
                &self.segments.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("doc_count", &self.doc_count())
            .finish()
    }
}

/// Pack `segments` into slices.
///
/// When `breaker` denies parallel execution, a single slice holding every
/// segment is returned instead. No segments yield no slices.
pub fn slices(
    segments: &[SegmentRef],
    max_docs_per_slice: u64,
    max_segments_per_slice: usize,
    breaker: Option<&dyn SliceAllocationCircuitBreaker>,
) -> Vec<LeafSlice> {
    if segments.is_empty() {
        return Vec::new();
    }
    if breaker.is_some_and(|b| !b.should_proceed()) {
        debug!(
            "Circuit breaker denied parallel slicing, searching {} segments in one slice",
            segments.len()
        );
        return vec![LeafSlice::new(segments.to_vec())];
    }

    let mut sorted = segments.to_vec();
    // Stable, so equally sized segments keep their input order.
    sorted.sort_by(|a, b| b.doc_count().cmp(&a.doc_count()));

    let mut groups: Vec<Vec<SegmentRef>> = Vec::new();
    let mut group: Vec<SegmentRef> = Vec::new();
    let mut group_docs: u64 = 0;

    for segment in sorted {
        let docs = segment.doc_count() as u64;
        if docs >= max_docs_per_slice {
            groups.push(vec![segment]);
            continue;
        }

        group.push(segment);
        group_docs += docs;
        if group.len() >= max_segments_per_slice || group_docs > max_docs_per_slice {
            groups.push(std::mem::take(&mut group));
            group_docs = 0;
        }
    }
    if !group.is_empty() {
        groups.push(group);
    }

    let slices: Vec<LeafSlice> = groups.into_iter().map(LeafSlice::new).collect();
    debug!(
        "Packed {} segments into {} slices (max_docs={}, max_segments={})",
        segments.len(),
        slices.len(),
        max_docs_per_slice,
        max_segments_per_slice
    );
    slices
}
