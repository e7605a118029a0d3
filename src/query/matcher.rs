//! Per-segment document iterators produced by queries.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::segment::{DocId, DocValues};

/// Sentinel doc id of an exhausted or unpositioned matcher.
pub const NO_MORE_DOCS: DocId = DocId::MAX;

/// Iterates the matching documents of one segment in ascending doc order.
pub trait Matcher: Send + Debug {
    /// The current document id, or [`NO_MORE_DOCS`] once exhausted.
    fn doc_id(&self) -> DocId;

    /// Move to the next matching document. Returns `false` when exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Score of the current document.
    fn score(&self) -> f32;

    /// Upper bound on the number of documents this matcher can return.
    fn cost(&self) -> u64;

    /// Hint that documents scoring below `score` are no longer needed.
    ///
    /// Returns `true` if the matcher will skip such documents from now on,
    /// in which case hit counts become a lower bound.
    fn set_min_competitive_score(&mut self, _score: f32) -> bool {
        false
    }
}

/// A matcher that matches no documents.
#[derive(Debug, Default)]
pub struct EmptyMatcher;

impl EmptyMatcher {
    /// Create a new empty matcher.
    pub fn new() -> Self {
        EmptyMatcher
    }
}

impl Matcher for EmptyMatcher {
    fn doc_id(&self) -> DocId {
        NO_MORE_DOCS
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn score(&self) -> f32 {
        0.0
    }

    fn cost(&self) -> u64 {
        0
    }
}

/// Matches every document of a segment with a constant score.
#[derive(Debug)]
pub struct AllDocsMatcher {
    doc_count: u32,
    next_doc: u32,
    current: DocId,
    score: f32,
}

impl AllDocsMatcher {
    /// Create a matcher over `0..doc_count`.
    pub fn new(doc_count: u32, score: f32) -> Self {
        AllDocsMatcher {
            doc_count,
            next_doc: 0,
            current: NO_MORE_DOCS,
            score,
        }
    }
}

impl Matcher for AllDocsMatcher {
    fn doc_id(&self) -> DocId {
        self.current
    }

    fn next(&mut self) -> Result<bool> {
        if self.next_doc >= self.doc_count {
            self.current = NO_MORE_DOCS;
            return Ok(false);
        }
        self.current = self.next_doc;
        self.next_doc += 1;
        Ok(true)
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn cost(&self) -> u64 {
        self.doc_count as u64
    }
}

/// Matches a sorted list of local doc ids with a constant score.
#[derive(Debug)]
pub struct DocListMatcher {
    docs: Vec<DocId>,
    position: usize,
    current: DocId,
    score: f32,
}

impl DocListMatcher {
    /// Create a matcher over `docs`, which are sorted and deduplicated here.
    pub fn new(mut docs: Vec<DocId>, score: f32) -> Self {
        docs.sort_unstable();
        docs.dedup();
        DocListMatcher {
            docs,
            position: 0,
            current: NO_MORE_DOCS,
            score,
        }
    }
}

impl Matcher for DocListMatcher {
    fn doc_id(&self) -> DocId {
        self.current
    }

    fn next(&mut self) -> Result<bool> {
        match self.docs.get(self.position) {
            Some(&doc) => {
                self.current = doc;
                self.position += 1;
                Ok(true)
            }
            None => {
                self.current = NO_MORE_DOCS;
                Ok(false)
            }
        }
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn cost(&self) -> u64 {
        self.docs.len() as u64
    }
}

/// Matches documents that have a numeric value in a column, scoring each
/// document by that value. Honors minimum competitive score hints.
#[derive(Debug)]
pub struct ValueScoreMatcher {
    entries: Vec<(DocId, f32)>,
    position: usize,
    current: DocId,
    current_score: f32,
    min_competitive_score: Option<f32>,
}

impl ValueScoreMatcher {
    /// Create a matcher from a numeric column.
    pub fn new(values: Arc<dyn DocValues>) -> Self {
        let entries = values
            .iter()
            .filter_map(|(doc, value)| value.as_f64().map(|v| (doc, v as f32)))
            .collect();
        ValueScoreMatcher {
            entries,
            position: 0,
            current: NO_MORE_DOCS,
            current_score: 0.0,
            min_competitive_score: None,
        }
    }
}

impl Matcher for ValueScoreMatcher {
    fn doc_id(&self) -> DocId {
        self.current
    }

    fn next(&mut self) -> Result<bool> {
        while let Some(&(doc, score)) = self.entries.get(self.position) {
            self.position += 1;
            if self
                .min_competitive_score
                .is_some_and(|min| score.total_cmp(&min) == Ordering::Less)
            {
                continue;
            }
            self.current = doc;
            self.current_score = score;
            return Ok(true);
        }
        self.current = NO_MORE_DOCS;
        Ok(false)
    }

    fn score(&self) -> f32 {
        self.current_score
    }

    fn cost(&self) -> u64 {
        self.entries.len() as u64
    }

    fn set_min_competitive_score(&mut self, score: f32) -> bool {
        self.min_competitive_score = Some(score);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::sort::SortValue;
    use crate::segment::{MemorySegment, Segment};

    fn drain(matcher: &mut dyn Matcher) -> Vec<(DocId, f32)> {
        let mut out = Vec::new();
        while matcher.next().unwrap() {
            out.push((matcher.doc_id(), matcher.score()));
        }
        assert_eq!(matcher.doc_id(), NO_MORE_DOCS);
        out
    }

    #[test]
    fn test_all_docs_matcher() {
        let mut matcher = AllDocsMatcher::new(3, 1.0);
        assert_eq!(matcher.cost(), 3);
        assert_eq!(drain(&mut matcher), vec![(0, 1.0), (1, 1.0), (2, 1.0)]);
        assert!(!matcher.next().unwrap());
    }

    #[test]
    fn test_doc_list_matcher_sorts_input() {
        let mut matcher = DocListMatcher::new(vec![5, 1, 5, 3], 2.0);
        let docs: Vec<DocId> = drain(&mut matcher).into_iter().map(|(d, _)| d).collect();
        assert_eq!(docs, vec![1, 3, 5]);
    }

    #[test]
    fn test_value_score_matcher_skips_below_min_score() {
        let segment = MemorySegment::builder("seg")
            .add_document([("rank", SortValue::Double(0.5))])
            .add_document([("rank", SortValue::Double(3.0))])
            .add_document([("other", SortValue::Long(1))])
            .add_document([("rank", SortValue::Double(1.5))])
            .build()
            .unwrap();
        let values = segment.doc_values("rank").unwrap();

        let mut matcher = ValueScoreMatcher::new(Arc::clone(&values));
        assert_eq!(drain(&mut matcher), vec![(0, 0.5), (1, 3.0), (3, 1.5)]);

        let mut matcher = ValueScoreMatcher::new(values);
        assert!(matcher.set_min_competitive_score(1.0));
        assert_eq!(drain(&mut matcher), vec![(1, 3.0), (3, 1.5)]);
    }

    #[test]
    fn test_empty_matcher() {
        let mut matcher = EmptyMatcher::new();
        assert!(drain(&mut matcher).is_empty());
        assert!(!matcher.set_min_competitive_score(1.0));
    }
}
