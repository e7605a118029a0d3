//! Slice-local top-K collectors.
//!
//! A collector is owned by exactly one slice task. It ranks the documents
//! of the segments it is fed, and cooperates with the collectors of other
//! slices through the shared checkers in [`crate::query::checker`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{PhalanxError, Result};
use crate::query::checker::{
    BottomValueChecker, FieldBottom, FieldValueChecker, HitsThresholdChecker,
    MaxBottomScoreChecker, RankBound, SharedRankState,
};
use crate::query::sort::{Sort, SortFieldType, SortValue, can_early_terminate};
use crate::query::top_docs::{ScoreDoc, TopDocs, TotalHits};
use crate::segment::{DocId, DocValues, Segment};

/// What the caller should do after a document was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectAction {
    /// Keep feeding documents of the current segment.
    Continue,
    /// No remaining document of the current segment can be competitive.
    TerminateSegment,
}

/// Trait for collecting ranked search results.
pub trait Collector: Send + Debug {
    /// Switch to a new segment. Must be called before collecting its docs.
    fn set_segment(&mut self, segment: &dyn Segment) -> Result<()>;

    /// Collect a matching document of the current segment (local doc id).
    fn collect(&mut self, doc: DocId, score: f32) -> Result<CollectAction>;

    /// Minimum score a document needs to still be competitive, once the
    /// collector is allowed to skip non-competitive hits.
    fn min_competitive_score(&self) -> Option<f32> {
        None
    }

    /// Record that some matching documents were skipped without being
    /// collected, so the hit count is only a lower bound.
    fn mark_total_hits_lower_bound(&mut self);

    /// Number of documents collected so far.
    fn total_hits(&self) -> u64;

    /// Whether any segment was cut short.
    fn is_early_terminated(&self) -> bool;

    /// Drain the collected documents, best first.
    fn top_docs(&mut self) -> TopDocs;
}

/// Create the collector matching `sort` for one slice of a query.
pub fn create_collector(
    sort: &Arc<Sort>,
    top_k: usize,
    state: &SharedRankState,
) -> Box<dyn Collector> {
    match state.bound() {
        RankBound::Score(bottom) if sort.is_relevance() => Box::new(TopScoreCollector::new(
            top_k,
            Arc::clone(state.hits()),
            Some(Arc::clone(bottom)),
        )),
        RankBound::Fields(bottom) if bottom.accepts_sort(sort) => Box::new(TopFieldCollector::new(
            Arc::clone(sort),
            top_k,
            Arc::clone(state.hits()),
            Some(Arc::clone(bottom)),
        )),
        _ if sort.is_relevance() => Box::new(TopScoreCollector::new(
            top_k,
            Arc::clone(state.hits()),
            None,
        )),
        _ => Box::new(TopFieldCollector::new(
            Arc::clone(sort),
            top_k,
            Arc::clone(state.hits()),
            None,
        )),
    }
}

/// Heap entry of [`TopScoreCollector`]. Greater means worse, so the heap's
/// top is the current bottom.
#[derive(Debug, Clone, Copy)]
struct ScoreEntry {
    score: f32,
    doc: u32,
}

impl PartialEq for ScoreEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoreEntry {}

impl PartialOrd for ScoreEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.doc.cmp(&other.doc))
    }
}

/// Keeps the top K documents by descending score, ties by ascending doc id.
#[derive(Debug)]
pub struct TopScoreCollector {
    top_k: usize,
    heap: BinaryHeap<ScoreEntry>,
    doc_base: u32,
    total_hits: u64,
    lower_bound: bool,
    hits: Arc<HitsThresholdChecker>,
    bottom: Option<Arc<MaxBottomScoreChecker>>,
}

impl TopScoreCollector {
    /// Create a collector that counts into `hits` and, if given, shares its
    /// bottom score through `bottom`.
    pub fn new(
        top_k: usize,
        hits: Arc<HitsThresholdChecker>,
        bottom: Option<Arc<MaxBottomScoreChecker>>,
    ) -> Self {
        TopScoreCollector {
            top_k,
            heap: BinaryHeap::with_capacity(top_k.min(1024) + 1),
            doc_base: 0,
            total_hits: 0,
            lower_bound: false,
            hits,
            bottom,
        }
    }

    /// A standalone collector with a private hit counter.
    pub fn local(top_k: usize, total_hits_threshold: u64) -> Self {
        let threshold = total_hits_threshold.max(top_k as u64);
        Self::new(top_k, Arc::new(HitsThresholdChecker::new(threshold)), None)
    }

    fn is_full(&self) -> bool {
        self.top_k > 0 && self.heap.len() >= self.top_k
    }

    fn local_bottom(&self) -> Option<f32> {
        if self.is_full() {
            self.heap.peek().map(|e| e.score)
        } else {
            None
        }
    }
}

impl Collector for TopScoreCollector {
    fn set_segment(&mut self, segment: &dyn Segment) -> Result<()> {
        self.doc_base = segment.doc_base();
        Ok(())
    }

    fn collect(&mut self, doc: DocId, score: f32) -> Result<CollectAction> {
        self.total_hits += 1;
        self.hits.increment_hit_count();
        if self.top_k == 0 {
            return Ok(CollectAction::Continue);
        }

        // Docs arrive in ascending global order, so a tie with the bottom
        // always loses.
        if self
            .local_bottom()
            .is_some_and(|bottom| score.total_cmp(&bottom) != Ordering::Greater)
        {
            return Ok(CollectAction::Continue);
        }
        if let Some(global) = self.bottom.as_ref().and_then(|b| b.bottom_value()) {
            if score.total_cmp(&global) == Ordering::Less {
                return Ok(CollectAction::Continue);
            }
        }

        self.heap.push(ScoreEntry {
            score,
            doc: global_doc(self.doc_base, doc)?,
        });
        if self.heap.len() > self.top_k {
            self.heap.pop();
        }
        if let (Some(checker), Some(bottom)) = (&self.bottom, self.local_bottom()) {
            checker.update_thread_local_bottom_value(bottom);
        }
        Ok(CollectAction::Continue)
    }

    fn min_competitive_score(&self) -> Option<f32> {
        if !self.hits.is_threshold_reached() {
            return None;
        }
        let global = self.bottom.as_ref().and_then(|b| b.bottom_value());
        match (self.local_bottom(), global) {
            (Some(local), Some(global)) => Some(match local.total_cmp(&global) {
                Ordering::Less => global,
                _ => local,
            }),
            (local, global) => local.or(global),
        }
    }

    fn mark_total_hits_lower_bound(&mut self) {
        self.lower_bound = true;
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }

    fn is_early_terminated(&self) -> bool {
        false
    }

    fn top_docs(&mut self) -> TopDocs {
        let score_docs = std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .map(|e| ScoreDoc {
                doc: e.doc,
                score: e.score,
                sort_values: vec![SortValue::Score(e.score)],
            })
            .collect();
        TopDocs {
            total_hits: total_hits(self.total_hits, self.lower_bound),
            score_docs,
        }
    }
}

/// Global id of segment-local `doc`, failing when it leaves the doc id space.
fn global_doc(doc_base: u32, doc: DocId) -> Result<u32> {
    doc_base.checked_add(doc).ok_or_else(|| {
        PhalanxError::segment(format!(
            "doc {doc} of the segment at base {doc_base} overflows the doc id space"
        ))
    })
}

fn total_hits(value: u64, lower_bound: bool) -> TotalHits {
    if lower_bound {
        TotalHits::lower_bound(value)
    } else {
        TotalHits::exact(value)
    }
}

/// Heap entry of [`TopFieldCollector`]. Greater means worse.
#[derive(Debug, Clone)]
struct FieldEntry {
    values: Vec<SortValue>,
    doc: u32,
    score: f32,
    sort: Arc<Sort>,
}

impl PartialEq for FieldEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldEntry {}

impl PartialOrd for FieldEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort
            .compare_ranked(&self.values, self.doc, &other.values, other.doc)
    }
}

/// Where the value of one sort field comes from in the current segment.
#[derive(Debug)]
enum SortColumn {
    Score,
    Doc,
    Values(Option<Arc<dyn DocValues>>),
}

/// Keeps the top K documents under an arbitrary [`Sort`].
///
/// When a segment is physically ordered compatibly with the sort, the
/// collector stops that segment at the first non-competitive document once
/// the hits threshold has been reached.
#[derive(Debug)]
pub struct TopFieldCollector {
    sort: Arc<Sort>,
    top_k: usize,
    heap: BinaryHeap<FieldEntry>,
    columns: Vec<SortColumn>,
    doc_base: u32,
    segment_sorted: bool,
    total_hits: u64,
    lower_bound: bool,
    early_terminated: bool,
    hits: Arc<HitsThresholdChecker>,
    bottom: Option<Arc<FieldValueChecker>>,
}

impl TopFieldCollector {
    /// Create a collector ranking by `sort`.
    pub fn new(
        sort: Arc<Sort>,
        top_k: usize,
        hits: Arc<HitsThresholdChecker>,
        bottom: Option<Arc<FieldValueChecker>>,
    ) -> Self {
        TopFieldCollector {
            sort,
            top_k,
            heap: BinaryHeap::with_capacity(top_k.min(1024) + 1),
            columns: Vec::new(),
            doc_base: 0,
            segment_sorted: false,
            total_hits: 0,
            lower_bound: false,
            early_terminated: false,
            hits,
            bottom,
        }
    }

    /// A standalone collector with a private hit counter.
    pub fn local(sort: Sort, top_k: usize, total_hits_threshold: u64) -> Self {
        let threshold = total_hits_threshold.max(top_k as u64);
        Self::new(
            Arc::new(sort),
            top_k,
            Arc::new(HitsThresholdChecker::new(threshold)),
            None,
        )
    }

    /// Whether the current segment allows early termination.
    pub fn is_segment_sorted(&self) -> bool {
        self.segment_sorted
    }

    fn is_full(&self) -> bool {
        self.top_k > 0 && self.heap.len() >= self.top_k
    }

    fn values_of(&self, doc: DocId, global_doc: u32, score: f32) -> Vec<SortValue> {
        self.columns
            .iter()
            .map(|column| match column {
                SortColumn::Score => SortValue::Score(score),
                SortColumn::Doc => SortValue::Doc(global_doc),
                SortColumn::Values(Some(values)) => values.value(doc).unwrap_or(SortValue::Null),
                SortColumn::Values(None) => SortValue::Null,
            })
            .collect()
    }

    fn non_competitive(&mut self) -> CollectAction {
        if self.segment_sorted && self.hits.is_threshold_reached() {
            self.early_terminated = true;
            self.lower_bound = true;
            CollectAction::TerminateSegment
        } else {
            CollectAction::Continue
        }
    }
}

impl Collector for TopFieldCollector {
    fn set_segment(&mut self, segment: &dyn Segment) -> Result<()> {
        let mut columns = Vec::with_capacity(self.sort.fields().len());
        for field in self.sort.fields() {
            let column = match (field.field_type(), field.field()) {
                (SortFieldType::Score, _) => SortColumn::Score,
                (SortFieldType::Doc, _) => SortColumn::Doc,
                (expected, Some(name)) => {
                    let values = segment.doc_values(name);
                    if let Some(values) = &values {
                        if values.value_type() != expected {
                            return Err(PhalanxError::segment(format!(
                                "segment {}: cannot sort field '{name}' as {expected:?}, it holds {:?} values",
                                segment.id(),
                                values.value_type()
                            )));
                        }
                    }
                    SortColumn::Values(values)
                }
                (_, None) => {
                    return Err(PhalanxError::query(format!(
                        "sort field {field} has no field name"
                    )));
                }
            };
            columns.push(column);
        }
        self.columns = columns;
        self.doc_base = segment.doc_base();
        self.segment_sorted = can_early_terminate(&self.sort, segment.index_sort());
        Ok(())
    }

    fn collect(&mut self, doc: DocId, score: f32) -> Result<CollectAction> {
        self.total_hits += 1;
        self.hits.increment_hit_count();
        if self.top_k == 0 {
            return Ok(CollectAction::Continue);
        }

        let global_doc = global_doc(self.doc_base, doc)?;
        let values = self.values_of(doc, global_doc, score);

        if self.is_full() {
            let competitive = self.heap.peek().is_some_and(|bottom| {
                self.sort
                    .compare_ranked(&values, global_doc, &bottom.values, bottom.doc)
                    == Ordering::Less
            });
            if !competitive {
                return Ok(self.non_competitive());
            }
        }
        if let Some(checker) = &self.bottom {
            if !checker.is_competitive(&values, global_doc) {
                return Ok(self.non_competitive());
            }
        }

        self.heap.push(FieldEntry {
            values,
            doc: global_doc,
            score,
            sort: Arc::clone(&self.sort),
        });
        if self.heap.len() > self.top_k {
            self.heap.pop();
        }
        if self.is_full() {
            if let (Some(checker), Some(bottom)) = (&self.bottom, self.heap.peek()) {
                checker.update_thread_local_bottom_value(Arc::new(FieldBottom {
                    sort_values: bottom.values.clone(),
                    doc: bottom.doc,
                }));
            }
        }
        Ok(CollectAction::Continue)
    }

    fn mark_total_hits_lower_bound(&mut self) {
        self.lower_bound = true;
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }

    fn is_early_terminated(&self) -> bool {
        self.early_terminated
    }

    fn top_docs(&mut self) -> TopDocs {
        let score_docs = std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .map(|e| ScoreDoc {
                doc: e.doc,
                score: e.score,
                sort_values: e.values,
            })
            .collect();
        TopDocs {
            total_hits: total_hits(self.total_hits, self.lower_bound),
            score_docs,
        }
    }
}
