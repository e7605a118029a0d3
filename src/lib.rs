//! # Phalanx
//!
//! A segment-parallel top-K search execution engine for Rust.
//!
//! ## Features
//!
//! - Slicing of index segments into bounded work units
//! - Pluggable execution control planes with queue-size backpressure
//! - Cross-slice pruning through shared bottom values and hit thresholds
//! - Early termination on index-sorted segments
//! - Cooperative cancellation and timeouts by query id

pub mod cli;
pub mod error;
pub mod parallel_search;
pub mod query;
pub mod segment;

pub mod prelude {
    pub use crate::error::{PhalanxError, Result};
    pub use crate::parallel_search::{
        CancelReason, ControlPlaneType, ParallelSearchConfig, ParallelSearchEngine,
        SearchOptions, SearchOutcome,
    };
    pub use crate::query::{
        DocSetQuery, FieldScoreQuery, MatchAllQuery, Query, ScoreDoc, Sort, SortField,
        SortFieldType, SortValue, TopDocs, TotalHits, TotalHitsRelation,
    };
    pub use crate::segment::{MemorySegment, Segment, SegmentRef, assign_doc_bases};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
