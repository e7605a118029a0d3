//! Merging of per-slice top-K results into the query-level top-K.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::query::sort::Sort;
use crate::query::top_docs::{ScoreDoc, TopDocs, TotalHits, TotalHitsRelation};

/// Cursor into one shard's ranked docs, ordered so that the max-heap pops
/// the best remaining document.
struct ShardCursor<'a> {
    sort: &'a Sort,
    docs: &'a [ScoreDoc],
    shard: usize,
    position: usize,
}

impl ShardCursor<'_> {
    fn current(&self) -> &ScoreDoc {
        &self.docs[self.position]
    }
}

impl PartialEq for ShardCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ShardCursor<'_> {}

impl PartialOrd for ShardCursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShardCursor<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.current(), other.current());
        // Reversed: the best ranked doc must be the heap maximum.
        self.sort
            .compare_ranked(&b.sort_values, b.doc, &a.sort_values, a.doc)
            .then_with(|| other.shard.cmp(&self.shard))
    }
}

/// Merge already-ranked shard results into the best `top_k` documents under
/// `sort`, breaking ties by ascending doc id and then by shard position.
///
/// Hit counts are summed; the total is a lower bound if any shard's is.
pub fn merge_top_docs(sort: &Sort, top_k: usize, shards: &[TopDocs]) -> TopDocs {
    let value = shards.iter().map(|s| s.total_hits.value).sum();
    let lower_bound = shards
        .iter()
        .any(|s| s.total_hits.relation == TotalHitsRelation::GreaterThanOrEqualTo);
    let total_hits = if lower_bound {
        TotalHits::lower_bound(value)
    } else {
        TotalHits::exact(value)
    };

    let mut heap: BinaryHeap<ShardCursor<'_>> = shards
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.score_docs.is_empty())
        .map(|(shard, s)| ShardCursor {
            sort,
            docs: &s.score_docs,
            shard,
            position: 0,
        })
        .collect();

    let available: usize = shards.iter().map(|s| s.score_docs.len()).sum();
    let mut score_docs = Vec::with_capacity(top_k.min(available));
    while score_docs.len() < top_k {
        let Some(mut cursor) = heap.pop() else {
            break;
        };
        score_docs.push(cursor.current().clone());
        cursor.position += 1;
        if cursor.position < cursor.docs.len() {
            heap.push(cursor);
        }
    }

    TopDocs {
        total_hits,
        score_docs,
    }
}

/// Merges shard results for one query.
#[derive(Debug, Clone)]
pub struct TopDocsMerger {
    sort: Sort,
    top_k: usize,
}

impl TopDocsMerger {
    /// Create a merger returning `top_k` documents ranked by `sort`.
    pub fn new(sort: Sort, top_k: usize) -> Self {
        Self { sort, top_k }
    }

    /// Merge `shards`.
    pub fn merge(&self, shards: &[TopDocs]) -> TopDocs {
        merge_top_docs(&self.sort, self.top_k, shards)
    }
}
