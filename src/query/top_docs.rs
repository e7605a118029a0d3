//! Ranked result types shared by slice collectors and the merger.

use serde::{Deserialize, Serialize};

use crate::query::sort::SortValue;

/// A ranked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDoc {
    /// Global document id.
    pub doc: u32,
    /// Score reported by the matcher.
    pub score: f32,
    /// One value per sort field of the query's sort.
    pub sort_values: Vec<SortValue>,
}

/// Whether a hit count is exact or a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalHitsRelation {
    /// The count is exact.
    EqualTo,
    /// Some matching documents were skipped; the count is a lower bound.
    GreaterThanOrEqualTo,
}

/// Number of matching documents seen while collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    /// The (possibly lower-bound) count.
    pub value: u64,
    /// Relation of `value` to the true count.
    pub relation: TotalHitsRelation,
}

impl TotalHits {
    /// An exact count.
    pub fn exact(value: u64) -> Self {
        TotalHits {
            value,
            relation: TotalHitsRelation::EqualTo,
        }
    }

    /// A lower-bound count.
    pub fn lower_bound(value: u64) -> Self {
        TotalHits {
            value,
            relation: TotalHitsRelation::GreaterThanOrEqualTo,
        }
    }

    /// Whether the count is exact.
    pub fn is_exact(&self) -> bool {
        self.relation == TotalHitsRelation::EqualTo
    }
}

/// Top-K documents in rank order plus the hit count they were drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopDocs {
    /// Total hits.
    pub total_hits: TotalHits,
    /// Ranked documents, best first.
    pub score_docs: Vec<ScoreDoc>,
}

impl TopDocs {
    /// An empty result with an exact hit count of zero.
    pub fn empty() -> Self {
        TopDocs {
            total_hits: TotalHits::exact(0),
            score_docs: Vec::new(),
        }
    }

    /// Global doc ids in rank order.
    pub fn doc_ids(&self) -> Vec<u32> {
        self.score_docs.iter().map(|d| d.doc).collect()
    }

    /// Number of ranked documents.
    pub fn len(&self) -> usize {
        self.score_docs.len()
    }

    /// Whether no documents were ranked.
    pub fn is_empty(&self) -> bool {
        self.score_docs.is_empty()
    }
}
