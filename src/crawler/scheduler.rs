//! Work distribution across a fixed pool of workers
//!
//! This module handles:
//! - The shared work queue every worker pulls from
//! - The per-entry pipeline (fetch, extract, transfer, metadata)
//! - Spawning workers and reporting their results as events
//! - Honouring the shutdown signal between entries

use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::parser::extract_sign;
use crate::crawler::retry::RetryFailure;
use crate::crawler::transfer::AssetTransfer;
use crate::output::MetadataWriter;
use crate::state::{CatalogEntry, EntryEvent, EntryStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;

/// Result of processing one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub event: EntryEvent,

    /// Metadata file written for a completed entry
    pub metadata_path: Option<PathBuf>,
}

impl EntryOutcome {
    fn failed(entry: &CatalogEntry, attempts: u32, reason: String) -> Self {
        Self {
            event: EntryEvent::failed(entry, attempts, reason),
            metadata_path: None,
        }
    }

    fn skipped(entry: &CatalogEntry, attempts: u32, reason: String) -> Self {
        Self {
            event: EntryEvent::skipped(entry, attempts, reason),
            metadata_path: None,
        }
    }
}

/// An entry waiting in the queue and the attempts it may still spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub entry: CatalogEntry,

    /// Attempts left before the entry reaches its ceiling; no leg may exceed it
    pub budget: u32,
}

impl WorkItem {
    pub fn new(entry: CatalogEntry, budget: u32) -> Self {
        Self {
            entry,
            budget: budget.max(1),
        }
    }
}

/// Processes one entry from start to finish
///
/// Implementations never return errors: every failure becomes a `failed` or
/// `skipped` event. The reported attempts must not exceed `budget`.
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    async fn process(&self, entry: &CatalogEntry, budget: u32) -> EntryOutcome;
}

/// A detail page the site answered with a client error (404, 410, ...)
fn page_is_gone(failure: &RetryFailure<FetchError>) -> bool {
    matches!(
        failure,
        RetryFailure::Permanent { error, .. }
            if error.status().is_some_and(|status| (400..500).contains(&status))
    )
}

/// The production processor: fetch, extract, transfer, write metadata
pub struct Pipeline {
    fetcher: PageFetcher,
    transfer: AssetTransfer,
    metadata: MetadataWriter,
    asset_ext: String,
}

impl Pipeline {
    pub fn new(
        fetcher: PageFetcher,
        transfer: AssetTransfer,
        metadata: MetadataWriter,
        asset_ext: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            transfer,
            metadata,
            asset_ext: asset_ext.into(),
        }
    }
}

#[async_trait]
impl EntryProcessor for Pipeline {
    async fn process(&self, entry: &CatalogEntry, budget: u32) -> EntryOutcome {
        let url = match Url::parse(&entry.detail_url) {
            Ok(url) => url,
            Err(e) => {
                return EntryOutcome::failed(entry, 1, format!("invalid detail locator: {}", e))
            }
        };

        let page = match self.fetcher.capped_at(budget).fetch(&url).await {
            Ok(page) => page,
            Err(failure) if page_is_gone(&failure) => {
                return EntryOutcome::skipped(
                    entry,
                    failure.attempts(),
                    format!("detail page unavailable: {}", failure),
                )
            }
            Err(failure) => {
                return EntryOutcome::failed(
                    entry,
                    failure.attempts(),
                    format!("page fetch failed: {}", failure),
                )
            }
        };

        let record = match extract_sign(&page.value, entry, &self.asset_ext) {
            Ok(record) => record,
            Err(e) => return EntryOutcome::skipped(entry, page.attempts, e.to_string()),
        };

        let transferred = match self.transfer.capped_at(budget).transfer(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let attempts = page.attempts.max(e.attempts());
                return EntryOutcome::failed(entry, attempts, e.to_string());
            }
        };
        let attempts = page.attempts.max(transferred.attempts());

        match self.metadata.write(&record).await {
            Ok(path) => EntryOutcome {
                event: EntryEvent::completed(entry, attempts),
                metadata_path: Some(path),
            },
            Err(e) => EntryOutcome::failed(entry, attempts, e.to_string()),
        }
    }
}

/// Queue shared by all workers; each entry is handed out once
#[derive(Debug, Default)]
pub struct WorkQueue {
    entries: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            entries: Mutex::new(items.into_iter().collect()),
        }
    }

    pub fn pop(&self) -> Option<WorkItem> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages from workers to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A worker took the entry off the queue
    Started { entry_id: String },

    /// The entry reached a result
    Finished(EntryOutcome),
}

/// A fixed number of workers draining one [`WorkQueue`]
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawns the workers
    ///
    /// Each worker returns the number of entries it finished. Workers stop
    /// when the queue is empty, when shutdown is raised (after finishing the
    /// entry in hand) or when the event receiver is gone.
    ///
    /// # Arguments
    ///
    /// * `queue` - Entries to process
    /// * `processor` - What to do with each entry
    /// * `events` - Where results are reported
    /// * `shutdown` - Raised to stop pulling new entries
    pub fn spawn(
        &self,
        queue: Arc<WorkQueue>,
        processor: Arc<dyn EntryProcessor>,
        events: mpsc::Sender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<usize>> {
        (0..self.size)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    processor: Arc::clone(&processor),
                    events: events.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    processor: Arc<dyn EntryProcessor>,
    events: mpsc::Sender<WorkerEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(self) -> usize {
        let mut finished = 0;

        loop {
            if *self.shutdown.borrow() {
                tracing::debug!(worker = self.id, "shutdown requested, stopping");
                break;
            }

            let Some(WorkItem { entry, budget }) = self.queue.pop() else {
                break;
            };

            let started = WorkerEvent::Started {
                entry_id: entry.name.clone(),
            };
            if self.events.send(started).await.is_err() {
                break;
            }

            let span = tracing::info_span!("sign", sign = %entry.name, worker = self.id);
            let outcome = self.processor.process(&entry, budget).instrument(span).await;

            let event = &outcome.event;
            match event.status {
                EntryStatus::Completed => tracing::info!(
                    sign = %event.entry_id,
                    status = %event.status,
                    attempts = event.attempts,
                    "Completed"
                ),
                _ => tracing::warn!(
                    sign = %event.entry_id,
                    status = %event.status,
                    attempts = event.attempts,
                    "{}",
                    event.error.as_deref().unwrap_or("no reason given")
                ),
            }

            if self.events.send(WorkerEvent::Finished(outcome)).await.is_err() {
                break;
            }
            finished += 1;
        }

        tracing::debug!(worker = self.id, finished, "worker done");
        finished
    }
}
