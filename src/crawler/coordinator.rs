//! Harvest coordinator - main orchestration logic
//!
//! This module contains the run loop that ties the harvest together:
//! - Discovering signs and merging them with recorded progress
//! - Deciding what still needs work before any worker starts
//! - Running the worker pool and applying its results one at a time
//! - Persisting progress, periodic syncs and graceful shutdown
//!
//! The coordinator is the only owner of the [`ProgressStore`]; workers talk to
//! it through a channel, so every state change is applied in one place.

use crate::config::Config;
use crate::crawler::catalog::{Catalog, TaskCatalog};
use crate::crawler::fetcher::{build_http_client, PageFetcher};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::scheduler::{Pipeline, WorkItem, WorkQueue, WorkerEvent, WorkerPool};
use crate::crawler::sync::{GitSync, SyncScheduler, SyncTarget};
use crate::crawler::transfer::AssetTransfer;
use crate::output::{MetadataWriter, RunSummary};
use crate::state::{CatalogEntry, ProgressStore};
use crate::storage::{open_asset_store, AssetStore};
use crate::url::detail_url;
use crate::HarvestError;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Main harvest coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    store: ProgressStore,
    client: Client,
    assets: Arc<dyn AssetStore>,
    sync: SyncScheduler,
    base: Url,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `fresh` - Start from an empty progress file instead of resuming
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - The progress file or a collaborator could not be opened
    pub fn new(config: Config, fresh: bool) -> Result<Self, HarvestError> {
        let client = build_http_client(&config.user_agent, &config.timeouts)?;
        let assets = open_asset_store(&config.storage, &config.timeouts)?;

        let sync_target: Option<Arc<dyn SyncTarget>> = if config.sync.enabled {
            Some(Arc::new(GitSync::new(
                &config.sync.repo_path,
                config.sync.remote.clone(),
            )))
        } else {
            None
        };

        Self::assemble(config, fresh, client, assets, sync_target)
    }

    /// Creates a coordinator with caller-supplied asset store and sync target
    pub fn with_collaborators(
        config: Config,
        fresh: bool,
        assets: Arc<dyn AssetStore>,
        sync_target: Option<Arc<dyn SyncTarget>>,
    ) -> Result<Self, HarvestError> {
        let client = build_http_client(&config.user_agent, &config.timeouts)?;
        Self::assemble(config, fresh, client, assets, sync_target)
    }

    fn assemble(
        config: Config,
        fresh: bool,
        client: Client,
        assets: Arc<dyn AssetStore>,
        sync_target: Option<Arc<dyn SyncTarget>>,
    ) -> Result<Self, HarvestError> {
        let base = Url::parse(&config.site.base_url)?;
        let progress_path = &config.output.progress_path;

        let store = if fresh {
            tracing::info!("Starting fresh, ignoring {}", progress_path);
            ProgressStore::fresh(progress_path)
        } else {
            ProgressStore::load(progress_path)?
        };

        let sync = match sync_target {
            Some(target) => SyncScheduler::new(target, config.sync.every, progress_path),
            None => SyncScheduler::disabled(),
        };

        Ok(Self {
            config: Arc::new(config),
            store,
            client,
            assets,
            sync,
            base,
        })
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.store
    }

    /// Runs the harvest until the work runs out or `shutdown` is raised
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Totals after the run; individual failures are in the summary
    /// * `Err(HarvestError)` - Progress could not be persisted; workers were stopped first
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<RunSummary, HarvestError> {
        let letters = self.config.site.letters.clone();
        tracing::info!(
            "Harvesting {} letters from {} with {} workers",
            letters.len(),
            self.base,
            self.config.workers.count
        );

        let fetcher = PageFetcher::from_config(self.client.clone(), &self.config);
        let catalog = TaskCatalog::new(fetcher.clone(), self.base.clone())
            .discover(&letters, &shutdown)
            .await;

        let work = self.plan(&catalog, &letters)?;
        self.store.persist()?;

        if work.is_empty() {
            tracing::info!("Nothing left to harvest");
        } else {
            self.process(work, fetcher, shutdown).await?;
        }

        self.store.persist()?;
        let stats = self.store.stats();
        self.sync
            .finish(&format!(
                "Final: {} signs completed, {} failed",
                stats.completed, stats.failed
            ))
            .await;

        let mut summary = RunSummary::from_store(&self.store);
        summary.failed_partitions = catalog.failed_partitions;
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            total = summary.total,
            "Harvest finished"
        );
        Ok(summary)
    }

    /// Registers discovered entries and picks the ones that still need work
    ///
    /// Unfinished entries recorded under the selected letters are queued even
    /// when this run's listing missed them. Each item carries the attempts
    /// its entry has left under the ceiling.
    fn plan(&mut self, catalog: &Catalog, letters: &[String]) -> Result<Vec<WorkItem>, HarvestError> {
        let ceiling = self.config.retry.entry_attempt_ceiling;
        let mut work = Vec::new();
        let mut queued = HashSet::new();
        let (mut finished, mut exhausted) = (0usize, 0usize);

        for entry in &catalog.entries {
            self.store.register(entry);
            if self.store.should_process(&entry.name, ceiling) {
                queued.insert(entry.name.clone());
                work.push(WorkItem::new(entry.clone(), self.budget_of(&entry.name)));
            } else if self.store.is_terminal(&entry.name) {
                finished += 1;
            } else {
                exhausted += 1;
            }
        }

        let mut recovered = 0usize;
        for (name, partition) in self.store.unfinished_in(letters) {
            if queued.contains(&name) || !self.store.should_process(&name, ceiling) {
                continue;
            }
            let detail = detail_url(&self.base, &name)?;
            let budget = self.budget_of(&name);
            work.push(WorkItem::new(
                CatalogEntry::new(name, partition, detail.to_string()),
                budget,
            ));
            recovered += 1;
        }

        tracing::info!(
            "{} signs to process ({} already done, {} out of attempts, {} recovered from progress)",
            work.len(),
            finished,
            exhausted,
            recovered
        );
        Ok(work)
    }

    /// Attempts an entry may still spend before reaching the ceiling
    fn budget_of(&self, name: &str) -> u32 {
        let spent = self.store.get(name).map_or(0, |entry| entry.attempts);
        self.config
            .retry
            .entry_attempt_ceiling
            .saturating_sub(spent)
    }

    /// Runs the worker pool over `work` and applies every result
    async fn process(
        &mut self,
        work: Vec<WorkItem>,
        fetcher: PageFetcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HarvestError> {
        let policy = RetryPolicy::from_config(&self.config.retry);
        let transfer = AssetTransfer::new(
            self.client.clone(),
            Arc::clone(&self.assets),
            policy,
            policy,
            self.config.timeouts.download(),
        );
        let metadata = MetadataWriter::new(
            &self.config.output.metadata_dir,
            &self.config.output.metadata_ext,
        );
        let pipeline = Arc::new(Pipeline::new(
            fetcher,
            transfer,
            metadata,
            &self.config.storage.asset_ext,
        ));

        let pool = WorkerPool::new(self.config.workers.count as usize);
        let (events_tx, mut events_rx) = mpsc::channel(pool.size() * 4);
        // Workers watch this channel rather than the caller's so a fatal
        // persist failure can stop them too.
        let (halt_tx, halt_rx) = watch::channel(*shutdown.borrow());
        let handles = pool.spawn(Arc::new(WorkQueue::new(work)), pipeline, events_tx, halt_rx);

        let persist_every = self.config.workers.persist_every.max(1);
        let mut since_persist = 0u32;
        let mut watching = !*shutdown.borrow();
        let mut fatal: Option<HarvestError> = None;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if fatal.is_some() {
                        continue;
                    }
                    if let Err(e) = self.handle_event(event, persist_every, &mut since_persist).await {
                        tracing::error!("Stopping harvest: {}", e);
                        halt_tx.send_replace(true);
                        fatal = Some(e);
                    }
                }
                changed = shutdown.changed(), if watching => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            tracing::info!("Shutdown requested, finishing signs in flight");
                            halt_tx.send_replace(true);
                            watching = false;
                        }
                        Ok(()) => {}
                        Err(_) => watching = false,
                    }
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Applies one worker event
    ///
    /// Only persistence failures are returned; a rejected transition is logged
    /// and the entry keeps its recorded state.
    async fn handle_event(
        &mut self,
        event: WorkerEvent,
        persist_every: u32,
        since_persist: &mut u32,
    ) -> Result<(), HarvestError> {
        let outcome = match event {
            WorkerEvent::Started { entry_id } => {
                if let Err(e) = self.store.mark_in_progress(&entry_id) {
                    tracing::warn!(sign = %entry_id, "{}", e);
                }
                return Ok(());
            }
            WorkerEvent::Finished(outcome) => outcome,
        };

        let status = outcome.event.status;
        if let Err(e) = self.store.apply(&outcome.event) {
            tracing::warn!(sign = %outcome.event.entry_id, "{}", e);
            return Ok(());
        }

        *since_persist += 1;
        let sync_due = self.sync.record(status, outcome.metadata_path);

        if *since_persist >= persist_every || (sync_due && *since_persist > 0) {
            self.store.persist()?;
            *since_persist = 0;
        }

        if sync_due {
            let message = self.sync.progress_message();
            self.sync.flush(&message).await;
        }

        Ok(())
    }
}

/// Runs a complete harvest with the stock collaborators
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `fresh` - Ignore any existing progress file
/// * `shutdown` - Raised (set to `true`) to stop after the signs in flight
///
/// # Example
///
/// ```no_run
/// use sign_harvester::config::load_config;
/// use sign_harvester::crawler::run_harvest;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let (_tx, rx) = tokio::sync::watch::channel(false);
/// let summary = run_harvest(config, false, rx).await?;
/// println!("{} completed", summary.completed);
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(
    config: Config,
    fresh: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, HarvestError> {
    let mut coordinator = Coordinator::new(config, fresh)?;
    coordinator.run(shutdown).await
}
