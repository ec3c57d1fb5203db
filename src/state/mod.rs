//! State module for tracking harvest progress
//!
//! This module provides the records that flow through the pipeline and the
//! durable progress that lets an interrupted run resume.
//!
//! # Components
//!
//! - `EntryStatus`: Lifecycle of a single sign (pending, in progress, completed, ...)
//! - `CatalogEntry` / `SignRecord`: Discovered entries and their extracted records
//! - `ProgressStore`: The progress file, owned by the coordinator

mod entry_status;
mod progress;
mod records;

// Re-export main types
pub use entry_status::EntryStatus;
pub use progress::{
    EntryEvent, EntryProgress, ProgressError, ProgressState, ProgressStats, ProgressStore,
};
pub use records::{CatalogEntry, SignRecord};
