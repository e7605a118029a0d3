//! Configuration for parallel search operations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PhalanxError, Result};
use crate::query::sort::Sort;

/// Default upper bound of documents packed into one slice.
pub const DEFAULT_MAX_DOCS_PER_SLICE: u64 = 250_000;

/// Default upper bound of segments packed into one slice.
pub const DEFAULT_MAX_SEGMENTS_PER_SLICE: usize = 5;

/// Default backpressure factor applied to the pool size.
pub const DEFAULT_LIMITING_FACTOR: f64 = 1.5;

/// Default number of hits to count exactly before early termination may
/// kick in.
pub const DEFAULT_TOTAL_HITS_THRESHOLD: u64 = 1000;

/// Configuration for the parallel search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSearchConfig {
    /// Maximum number of documents per slice.
    pub max_docs_per_slice: u64,

    /// Maximum number of segments per slice.
    pub max_segments_per_slice: usize,

    /// Worker pool size. If None, uses the number of CPU cores.
    pub thread_pool_size: Option<usize>,

    /// Tasks run on the calling thread once the pool's pending queue holds
    /// `thread_pool_size * limiting_factor` jobs.
    pub limiting_factor: f64,

    /// How slice tasks are dispatched.
    pub control_plane: ControlPlaneType,

    /// Default hits threshold for queries that do not override it.
    pub total_hits_threshold: u64,

    /// Default timeout for queries that do not set one.
    pub default_timeout: Option<Duration>,

    /// Whether to enable metrics collection.
    pub enable_metrics: bool,

    /// When set, parallel slicing is denied while this many queries are
    /// already running.
    pub max_in_flight_queries: Option<usize>,
}

impl Default for ParallelSearchConfig {
    fn default() -> Self {
        Self {
            max_docs_per_slice: DEFAULT_MAX_DOCS_PER_SLICE,
            max_segments_per_slice: DEFAULT_MAX_SEGMENTS_PER_SLICE,
            thread_pool_size: None,
            limiting_factor: DEFAULT_LIMITING_FACTOR,
            control_plane: ControlPlaneType::QueueSizeBased,
            total_hits_threshold: DEFAULT_TOTAL_HITS_THRESHOLD,
            default_timeout: None,
            enable_metrics: true,
            max_in_flight_queries: None,
        }
    }
}

impl ParallelSearchConfig {
    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse a configuration from a JSON string. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ParallelSearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The worker pool size after applying the CPU-count default.
    pub fn pool_size(&self) -> usize {
        self.thread_pool_size.unwrap_or_else(num_cpus::get)
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_docs_per_slice == 0 {
            return Err(PhalanxError::invalid_config(
                "max_docs_per_slice must be greater than 0",
            ));
        }
        if self.max_segments_per_slice == 0 {
            return Err(PhalanxError::invalid_config(
                "max_segments_per_slice must be greater than 0",
            ));
        }
        if self.thread_pool_size == Some(0) {
            return Err(PhalanxError::invalid_config(
                "thread_pool_size must be greater than 0",
            ));
        }
        if !self.limiting_factor.is_finite() || self.limiting_factor <= 0.0 {
            return Err(PhalanxError::invalid_config(format!(
                "limiting_factor must be a positive number, got {}",
                self.limiting_factor
            )));
        }
        if self.max_in_flight_queries == Some(0) {
            return Err(PhalanxError::invalid_config(
                "max_in_flight_queries must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Strategy used to dispatch slice tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPlaneType {
    /// Worker pool with queue-size based backpressure; last task on caller.
    #[default]
    QueueSizeBased,

    /// Worker pool without backpressure; last task on caller.
    SliceBased,

    /// Fixed fan-out on a rayon pool.
    Rayon,

    /// Everything on the calling thread.
    Sequential,
}

impl std::str::FromStr for ControlPlaneType {
    type Err = PhalanxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" | "queue_size_based" => Ok(ControlPlaneType::QueueSizeBased),
            "slice" | "slice_based" => Ok(ControlPlaneType::SliceBased),
            "rayon" => Ok(ControlPlaneType::Rayon),
            "sequential" => Ok(ControlPlaneType::Sequential),
            other => Err(PhalanxError::invalid_config(format!(
                "unknown control plane '{other}'"
            ))),
        }
    }
}

/// Options for a specific search request.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Number of documents to return.
    pub top_k: usize,

    /// Ranking of the returned documents.
    pub sort: Sort,

    /// Override of the engine's hits threshold.
    pub total_hits_threshold: Option<u64>,

    /// Timeout for this specific search.
    pub timeout: Option<Duration>,

    /// External identifier the query can be cancelled by.
    pub query_id: Option<String>,

    /// Whether to record this search in the engine metrics.
    pub collect_metrics: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            sort: Sort::relevance(),
            total_hits_threshold: None,
            timeout: None,
            query_id: None,
            collect_metrics: true,
        }
    }
}

impl SearchOptions {
    /// Create options returning `top_k` documents by relevance.
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }

    /// Rank by `sort` instead of relevance.
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Override the engine's hits threshold.
    pub fn with_total_hits_threshold(mut self, threshold: u64) -> Self {
        self.total_hits_threshold = Some(threshold);
        self
    }

    /// Set the timeout for this search.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register the query under an external identifier.
    pub fn with_query_id<S: Into<String>>(mut self, query_id: S) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    /// Set whether to collect metrics.
    pub fn with_metrics(mut self, collect: bool) -> Self {
        self.collect_metrics = collect;
        self
    }

    /// Reject options that cannot produce a result.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(PhalanxError::invalid_argument(
                "top_k must be greater than 0",
            ));
        }
        self.sort.validate()?;
        if self.query_id.as_deref().is_some_and(str::is_empty) {
            return Err(PhalanxError::invalid_argument(
                "query_id must not be empty",
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(PhalanxError::invalid_argument(
                "timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}
