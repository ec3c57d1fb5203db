//! Crawler module for discovering and harvesting signs
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with bounded retry
//! - Listing and detail page parsing
//! - Video transfer into the asset store
//! - Work distribution over a worker pool
//! - Periodic syncs and overall run coordination

mod catalog;
mod coordinator;
mod fetcher;
mod parser;
mod retry;
mod scheduler;
mod sync;
mod transfer;

pub use catalog::{Catalog, TaskCatalog};
pub use coordinator::{run_harvest, Coordinator};
pub use fetcher::{build_http_client, get_bytes, get_text, FetchError, PageFetcher};
pub use parser::{extract_sign, parse_listing, ListingPage, ParseError};
pub use retry::{Attempted, RetryFailure, RetryPolicy, Retryable};
pub use scheduler::{
    EntryOutcome, EntryProcessor, Pipeline, WorkItem, WorkQueue, WorkerEvent, WorkerPool,
};
pub use sync::{GitSync, SyncError, SyncScheduler, SyncTarget};
pub use transfer::{AssetTransfer, TransferError, TransferOutcome};
