//! Output module for harvest results and reports
//!
//! This module handles:
//! - Writing one metadata file per harvested sign
//! - Building and printing run summaries

mod metadata;
pub mod summary;

pub use metadata::{MetadataError, MetadataWriter};
pub use summary::{load_summary, print_summary, FailureLine, RunSummary};
