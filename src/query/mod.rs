//! Query side of search execution: queries, sorts, collectors and the
//! rank state shared between concurrently running collectors.

pub mod checker;
pub mod collector;
pub mod matcher;
#[allow(clippy::module_inception)]
pub mod query;
pub mod sort;
pub mod top_docs;

pub use self::checker::{
    BottomValueChecker, FieldBottom, FieldValueChecker, HitsThresholdChecker,
    MaxBottomScoreChecker, RankBound, SharedRankState,
};
pub use self::collector::{
    CollectAction, Collector, TopFieldCollector, TopScoreCollector, create_collector,
};
pub use self::matcher::{
    AllDocsMatcher, DocListMatcher, EmptyMatcher, Matcher, NO_MORE_DOCS, ValueScoreMatcher,
};
pub use self::query::{DocSetQuery, FieldScoreQuery, MatchAllQuery, Query};
pub use self::sort::{Sort, SortField, SortFieldType, SortValue, can_early_terminate};
pub use self::top_docs::{ScoreDoc, TopDocs, TotalHits, TotalHitsRelation};
