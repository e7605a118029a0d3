//! Base query trait and the built-in queries used to drive collection.
//!
//! Matching and scoring models are deliberately simple here: queries only
//! need to hand each slice task a per-segment [`Matcher`].

use std::fmt::Debug;

use crate::error::{PhalanxError, Result};
use crate::query::matcher::{AllDocsMatcher, DocListMatcher, EmptyMatcher, Matcher, ValueScoreMatcher};
use crate::query::sort::SortFieldType;
use crate::segment::Segment;

/// Trait for search queries.
pub trait Query: Send + Sync + Debug {
    /// Create a matcher for this query over one segment.
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>>;

    /// Get a human-readable description of this query.
    fn description(&self) -> String;

    /// Clone this query.
    fn clone_box(&self) -> Box<dyn Query>;
}

/// Matches every document with a constant score.
#[derive(Debug, Clone)]
pub struct MatchAllQuery {
    score: f32,
}

impl MatchAllQuery {
    /// Create a match-all query scoring every document 1.0.
    pub fn new() -> Self {
        MatchAllQuery { score: 1.0 }
    }

    /// Use `score` as the constant score.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

impl Default for MatchAllQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl Query for MatchAllQuery {
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(AllDocsMatcher::new(segment.doc_count(), self.score)))
    }

    fn description(&self) -> String {
        "*:*".to_string()
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

/// Matches documents that have a numeric value for `field` and scores them
/// by that value.
#[derive(Debug, Clone)]
pub struct FieldScoreQuery {
    field: String,
}

impl FieldScoreQuery {
    /// Create a query scoring by `field`.
    pub fn new<S: Into<String>>(field: S) -> Self {
        FieldScoreQuery {
            field: field.into(),
        }
    }
}

impl Query for FieldScoreQuery {
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>> {
        let Some(values) = segment.doc_values(&self.field) else {
            return Ok(Box::new(EmptyMatcher::new()));
        };
        match values.value_type() {
            SortFieldType::Long | SortFieldType::Double => {
                Ok(Box::new(ValueScoreMatcher::new(values)))
            }
            other => Err(PhalanxError::query(format!(
                "segment {}: field '{}' is {:?}, not numeric",
                segment.id(),
                self.field,
                other
            ))),
        }
    }

    fn description(&self) -> String {
        format!("score({})", self.field)
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

/// Matches an explicit set of global document ids with a constant score.
#[derive(Debug, Clone)]
pub struct DocSetQuery {
    docs: Vec<u32>,
}

impl DocSetQuery {
    /// Create a query over global doc ids.
    pub fn new(mut docs: Vec<u32>) -> Self {
        docs.sort_unstable();
        docs.dedup();
        DocSetQuery { docs }
    }
}

impl Query for DocSetQuery {
    fn matcher(&self, segment: &dyn Segment) -> Result<Box<dyn Matcher>> {
        let base = segment.doc_base();
        let end = base as u64 + segment.doc_count() as u64;
        let start = self.docs.partition_point(|&d| d < base);
        let local: Vec<u32> = self.docs[start..]
            .iter()
            .take_while(|&&d| (d as u64) < end)
            .map(|&d| d - base)
            .collect();
        Ok(Box::new(DocListMatcher::new(local, 1.0)))
    }

    fn description(&self) -> String {
        format!("docs({})", self.docs.len())
    }

    fn clone_box(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}
