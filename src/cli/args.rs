//! Command line argument parsing for the Phalanx CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::parallel_search::config::{DEFAULT_MAX_DOCS_PER_SLICE, DEFAULT_MAX_SEGMENTS_PER_SLICE};

/// Phalanx - A segment-parallel top-K search execution engine
#[derive(Parser, Debug, Clone)]
#[command(name = "phalanx")]
#[command(about = "Plan and run segment-parallel top-K searches")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct PhalanxArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug, 4=trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl PhalanxArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the slice plan for a list of segment sizes
    Slices(SlicesArgs),

    /// Run a top-K search over synthetic in-memory segments
    Search(SearchArgs),
}

/// Arguments for planning slices
#[derive(Parser, Debug, Clone)]
pub struct SlicesArgs {
    /// Document count of every segment, in index order (comma-separated)
    #[arg(value_name = "DOC_COUNTS", value_delimiter = ',', required = true)]
    pub doc_counts: Vec<u32>,

    /// Maximum number of documents per slice
    #[arg(long, default_value_t = DEFAULT_MAX_DOCS_PER_SLICE)]
    pub max_docs_per_slice: u64,

    /// Maximum number of segments per slice
    #[arg(long, default_value_t = DEFAULT_MAX_SEGMENTS_PER_SLICE)]
    pub max_segments_per_slice: usize,

    /// Plan as if the circuit breaker denied parallel slicing
    #[arg(long)]
    pub sequential: bool,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Number of synthetic segments
    #[arg(long, default_value = "8")]
    pub segments: usize,

    /// Average number of documents per segment
    #[arg(long, default_value = "10000")]
    pub docs_per_segment: u32,

    /// Seed of the document generator
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Query to run
    #[arg(long, default_value = "match-all")]
    pub query: QueryKind,

    /// Sort, e.g. `score`, `doc` or `price:long:desc,rating:double`
    #[arg(short, long, default_value = "score")]
    pub sort: String,

    /// Sort the segments are physically ordered by
    #[arg(long)]
    pub index_sort: Option<String>,

    /// Maximum number of results to return
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: usize,

    /// Number of hits to count exactly before pruning
    #[arg(long)]
    pub total_hits_threshold: Option<u64>,

    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Worker pool size (overrides the configuration)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Control plane: queue, slice, rayon or sequential (overrides the configuration)
    #[arg(long)]
    pub control_plane: Option<String>,

    /// Maximum number of documents per slice (overrides the configuration)
    #[arg(long)]
    pub max_docs_per_slice: Option<u64>,

    /// Maximum number of segments per slice (overrides the configuration)
    #[arg(long)]
    pub max_segments_per_slice: Option<usize>,

    /// Timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Identifier to register the query under
    #[arg(long)]
    pub query_id: Option<String>,

    /// Number of times to run the query
    #[arg(long, default_value = "1")]
    pub repeat: usize,
}

/// Synthetic queries available in the CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    /// Every document with a constant score
    MatchAll,
    /// Documents with a rating, scored by it
    Rating,
    /// Documents with a price, scored by it
    Price,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}
