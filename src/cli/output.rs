//! Output formatting for CLI commands.

use serde::Serialize;

use crate::cli::args::{OutputFormat, PhalanxArgs};
use crate::error::Result;
use crate::parallel_search::metrics::SearchMetrics;
use crate::query::sort::SortValue;
use crate::query::top_docs::TotalHitsRelation;

/// One slice of a slice plan.
#[derive(Debug, Serialize)]
pub struct SliceReport {
    pub index: usize,
    pub segments: Vec<String>,
    pub doc_count: u64,
}

/// Result structure for slice planning.
#[derive(Debug, Serialize)]
pub struct SlicePlanResult {
    pub total_segments: usize,
    pub total_docs: u64,
    pub slices: Vec<SliceReport>,
}

/// A returned document.
#[derive(Debug, Serialize)]
pub struct HitReport {
    pub doc: u32,
    pub score: f32,
    pub sort_values: Vec<SortValue>,
}

/// Result structure for search operations.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub query_id: Option<String>,
    pub status: String,
    pub slices: usize,
    pub hits: Vec<HitReport>,
    pub total_hits: u64,
    pub total_hits_relation: TotalHitsRelation,
    pub failures: Vec<String>,
    pub duration_ms: f64,
    pub metrics: Option<SearchMetrics>,
}

/// Results that can describe themselves to a person.
pub trait HumanOutput {
    /// Print `self` in human-readable form.
    fn print_human(&self, args: &PhalanxArgs);
}

/// Output a result in the specified format.
pub fn output_result<T>(message: &str, result: &T, args: &PhalanxArgs) -> Result<()>
where
    T: Serialize + HumanOutput,
{
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                println!("{message}");
                println!();
            }
            result.print_human(args);
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &PhalanxArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

impl HumanOutput for SlicePlanResult {
    fn print_human(&self, _args: &PhalanxArgs) {
        println!("Slice Plan:");
        println!("═══════════");
        for slice in &self.slices {
            println!(
                "Slice {}: {} docs in [{}]",
                slice.index,
                slice.doc_count,
                slice.segments.join(", ")
            );
        }
        println!();
        println!(
            "{} segments, {} docs, {} slices",
            self.total_segments,
            self.total_docs,
            self.slices.len()
        );
    }
}

impl HumanOutput for SearchResult {
    fn print_human(&self, args: &PhalanxArgs) {
        println!("Search Results:");
        println!("═══════════════");

        for (i, hit) in self.hits.iter().enumerate() {
            let values: Vec<String> = hit.sort_values.iter().map(|v| v.to_string()).collect();
            println!(
                "{:>4}. doc {:<10} score {:<10.3} [{}]",
                i + 1,
                hit.doc,
                hit.score,
                values.join(", ")
            );
        }

        println!();
        println!("Status: {}", self.status);
        if let Some(query_id) = &self.query_id {
            println!("Query id: {query_id}");
        }
        let relation = match self.total_hits_relation {
            TotalHitsRelation::EqualTo => "",
            TotalHitsRelation::GreaterThanOrEqualTo => ">= ",
        };
        println!("Total hits: {relation}{}", self.total_hits);
        println!("Slices: {}", self.slices);
        println!("Search time: {:.3}ms", self.duration_ms);

        for failure in &self.failures {
            println!("Failure: {failure}");
        }

        if let Some(metrics) = &self.metrics
            && args.verbosity() > 1
        {
            println!();
            println!("Engine Metrics:");
            println!("───────────────");
            println!("Searches: {}", metrics.total_searches);
            println!("Slices executed: {}", metrics.slices_executed);
            println!(
                "Caller thread executions: {}",
                metrics.caller_thread_executions
            );
            println!(
                "Early terminated slices: {}",
                metrics.early_terminated_slices
            );
            println!(
                "Segments searched/terminated: {}/{}",
                metrics.segments_searched, metrics.segments_terminated
            );
            println!(
                "Latency avg/min/max: {:?}/{:?}/{:?}",
                metrics.avg_execution_time, metrics.min_execution_time, metrics.max_execution_time
            );
        }
    }
}
