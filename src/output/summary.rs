//! Run summaries
//!
//! This module builds the end-of-run report from the progress store and
//! prints it; `--stats` uses the same path to report on a progress file
//! without harvesting.

use crate::state::{EntryStatus, ProgressError, ProgressStore};
use std::path::Path;

/// One failed sign and the reason it last failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLine {
    pub sign: String,
    pub attempts: u32,
    pub reason: String,
}

/// Totals of a harvest, as recorded in the progress file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,

    /// Every entry the progress file knows about
    pub total: u64,

    /// Entries still pending or in progress
    pub unfinished: u64,

    pub failures: Vec<FailureLine>,

    /// Letters whose listing could not be read completely in this run
    pub failed_partitions: Vec<String>,
}

impl RunSummary {
    /// Builds a summary from the current state of `store`
    pub fn from_store(store: &ProgressStore) -> Self {
        let stats = store.stats();
        let unfinished = store
            .state()
            .entries
            .values()
            .filter(|entry| entry.status.is_active())
            .count() as u64;

        let failures = store
            .failures()
            .into_iter()
            .map(|(sign, entry)| FailureLine {
                sign,
                attempts: entry.attempts,
                reason: entry
                    .last_error
                    .unwrap_or_else(|| EntryStatus::Failed.to_string()),
            })
            .collect();

        Self {
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            total: stats.total,
            unfinished,
            failures,
            failed_partitions: Vec::new(),
        }
    }
}

/// Loads a summary straight from a progress file
///
/// # Arguments
///
/// * `progress_path` - Path of the progress file
///
/// # Returns
///
/// * `Ok(RunSummary)` - Summary of the file (empty if it does not exist)
/// * `Err(ProgressError)` - The file exists but could not be read
pub fn load_summary(progress_path: &Path) -> Result<RunSummary, ProgressError> {
    let store = ProgressStore::load(progress_path)?;
    Ok(RunSummary::from_store(&store))
}

/// Prints a summary to stdout in a formatted manner
pub fn print_summary(summary: &RunSummary) {
    println!("=== Harvest Summary ===\n");

    println!("Signs:");
    println!("  Completed: {}", summary.completed);
    println!("  Failed: {}", summary.failed);
    println!("  Skipped: {}", summary.skipped);
    if summary.unfinished > 0 {
        println!("  Unfinished: {}", summary.unfinished);
    }
    println!("  Total: {}", summary.total);

    if summary.total > 0 {
        let done = summary.completed + summary.skipped;
        println!(
            "  Done: {:.1}%",
            (done as f64 / summary.total as f64) * 100.0
        );
    }

    if !summary.failed_partitions.is_empty() {
        println!();
        println!("Letters not fully listed: {}", summary.failed_partitions.join(", "));
    }

    if !summary.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &summary.failures {
            println!(
                "  {} ({} attempts): {}",
                failure.sign, failure.attempts, failure.reason
            );
        }
    }
}
