//! Durable per-entry progress
//!
//! The progress file is the single source of truth for resuming a run. It is
//! only ever written through [`ProgressStore::persist`], which replaces the
//! whole file atomically.

use crate::state::{CatalogEntry, EntryStatus};
use crate::storage::atomic::{sweep_partials, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or persisting progress
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to read progress file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist progress to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize progress: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("entry {0} is not tracked")]
    UnknownEntry(String),
}

/// Progress of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryProgress {
    pub status: EntryStatus,

    /// Attempts consumed across all runs
    pub attempts: u32,

    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub partition: Option<String>,
}

/// Aggregate counters kept alongside the entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
}

impl ProgressStats {
    fn adjust(&mut self, status: EntryStatus, delta: i64) {
        let counter = match status {
            EntryStatus::Completed => &mut self.completed,
            EntryStatus::Failed => &mut self.failed,
            EntryStatus::Skipped => &mut self.skipped,
            EntryStatus::Pending | EntryStatus::InProgress => return,
        };
        *counter = counter.saturating_add_signed(delta);
    }

    /// Entries that reached a final outcome in some run
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }
}

/// Serialized form of the progress file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub entries: BTreeMap<String, EntryProgress>,

    #[serde(default)]
    pub stats: ProgressStats,
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_updated: None,
            entries: BTreeMap::new(),
            stats: ProgressStats::default(),
        }
    }

    /// Recomputes the counters from the entry map
    ///
    /// Files edited by hand or written by an older build may carry stale
    /// counters; the entry map wins.
    fn recount(&mut self) {
        let mut stats = ProgressStats {
            total: self.entries.len() as u64,
            ..ProgressStats::default()
        };
        for entry in self.entries.values() {
            stats.adjust(entry.status, 1);
        }
        self.stats = stats;
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

/// The final outcome of processing one entry, as reported by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryEvent {
    pub entry_id: String,
    pub partition: String,
    pub status: EntryStatus,

    /// Attempts consumed by this processing (highest attempt of any leg)
    pub attempts: u32,

    pub error: Option<String>,
}

impl EntryEvent {
    pub fn completed(entry: &CatalogEntry, attempts: u32) -> Self {
        Self::new(entry, EntryStatus::Completed, attempts, None)
    }

    pub fn skipped(entry: &CatalogEntry, attempts: u32, reason: impl Into<String>) -> Self {
        Self::new(entry, EntryStatus::Skipped, attempts, Some(reason.into()))
    }

    pub fn failed(entry: &CatalogEntry, attempts: u32, reason: impl Into<String>) -> Self {
        Self::new(entry, EntryStatus::Failed, attempts, Some(reason.into()))
    }

    fn new(
        entry: &CatalogEntry,
        status: EntryStatus,
        attempts: u32,
        error: Option<String>,
    ) -> Self {
        Self {
            entry_id: entry.name.clone(),
            partition: entry.partition.clone(),
            status,
            attempts,
            error,
        }
    }
}

/// Owner of the progress state and its file
///
/// Not shared between tasks: one owner applies every change, which keeps the
/// counters and the file consistent without locking.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: ProgressState,
}

impl ProgressStore {
    /// Loads the progress file, starting empty when it does not exist
    ///
    /// A file that exists but cannot be parsed is an error: silently starting
    /// over would reprocess every completed entry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProgressError> {
        let path = path.into();

        if let Some(dir) = parent_dir(&path) {
            match sweep_partials(dir) {
                Ok(0) => {}
                Ok(n) => tracing::warn!("Removed {} unfinished progress write(s)", n),
                Err(e) => tracing::debug!("Could not sweep {}: {}", dir.display(), e),
            }
        }

        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No progress file at {}, starting empty", path.display());
                return Ok(Self::fresh(path));
            }
            Err(source) => return Err(ProgressError::Read { path, source }),
        };

        let mut state: ProgressState = match serde_json::from_slice(&content) {
            Ok(state) => state,
            Err(source) => return Err(ProgressError::Corrupt { path, source }),
        };
        state.recount();

        tracing::info!(
            "Loaded progress for {} entries ({} completed, {} failed, {} skipped)",
            state.stats.total,
            state.stats.completed,
            state.stats.failed,
            state.stats.skipped
        );

        Ok(Self { path, state })
    }

    /// Creates an empty store that will overwrite `path` on the next persist
    pub fn fresh(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: ProgressState::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> ProgressStats {
        self.state.stats
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn get(&self, id: &str) -> Option<&EntryProgress> {
        self.state.entries.get(id)
    }

    /// Returns true if the entry is completed or skipped
    pub fn is_terminal(&self, id: &str) -> bool {
        self.get(id).map_or(false, |entry| entry.status.is_terminal())
    }

    /// Returns true if the entry failed often enough to be left alone
    pub fn is_exhausted(&self, id: &str, ceiling: u32) -> bool {
        self.get(id).map_or(false, |entry| {
            entry.status == EntryStatus::Failed && entry.attempts >= ceiling
        })
    }

    /// Returns true if a worker should process the entry in this run
    pub fn should_process(&self, id: &str, ceiling: u32) -> bool {
        match self.get(id) {
            None => true,
            Some(entry) if entry.status.is_active() => true,
            Some(entry) if entry.status == EntryStatus::Failed => entry.attempts < ceiling,
            Some(_) => false,
        }
    }

    /// Tracks a discovered entry as pending; known entries are left untouched
    ///
    /// Returns true if the entry was new.
    pub fn register(&mut self, entry: &CatalogEntry) -> bool {
        if self.state.entries.contains_key(&entry.name) {
            return false;
        }

        self.state.entries.insert(
            entry.name.clone(),
            EntryProgress {
                status: EntryStatus::Pending,
                attempts: 0,
                last_error: None,
                updated_at: Utc::now(),
                partition: Some(entry.partition.clone()),
            },
        );
        self.state.stats.total += 1;
        true
    }

    /// Records that a worker picked the entry up
    pub fn mark_in_progress(&mut self, id: &str) -> Result<(), ProgressError> {
        let entry = self
            .state
            .entries
            .get_mut(id)
            .ok_or_else(|| ProgressError::UnknownEntry(id.to_string()))?;

        if !entry.status.can_transition_to(EntryStatus::InProgress) {
            return Err(ProgressError::InvalidTransition {
                id: id.to_string(),
                from: entry.status,
                to: EntryStatus::InProgress,
            });
        }

        self.state.stats.adjust(entry.status, -1);
        entry.status = EntryStatus::InProgress;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a worker's result to the entry and the counters
    ///
    /// Entries that were never registered are added. Terminal entries refuse
    /// any change, so a completed entry can never be downgraded.
    pub fn apply(&mut self, event: &EntryEvent) -> Result<(), ProgressError> {
        if !EntryStatus::InProgress.can_transition_to(event.status) {
            return Err(ProgressError::InvalidTransition {
                id: event.entry_id.clone(),
                from: EntryStatus::InProgress,
                to: event.status,
            });
        }

        let now = Utc::now();
        match self.state.entries.get_mut(&event.entry_id) {
            Some(entry) => {
                if entry.status.is_terminal() {
                    return Err(ProgressError::InvalidTransition {
                        id: event.entry_id.clone(),
                        from: entry.status,
                        to: event.status,
                    });
                }

                self.state.stats.adjust(entry.status, -1);
                entry.status = event.status;
                entry.attempts = entry.attempts.saturating_add(event.attempts);
                entry.last_error = event.error.clone();
                entry.updated_at = now;
                if entry.partition.is_none() {
                    entry.partition = Some(event.partition.clone());
                }
            }
            None => {
                self.state.entries.insert(
                    event.entry_id.clone(),
                    EntryProgress {
                        status: event.status,
                        attempts: event.attempts,
                        last_error: event.error.clone(),
                        updated_at: now,
                        partition: Some(event.partition.clone()),
                    },
                );
                self.state.stats.total += 1;
            }
        }

        self.state.stats.adjust(event.status, 1);
        Ok(())
    }

    /// Rewrites the whole progress file atomically
    pub fn persist(&mut self) -> Result<(), ProgressError> {
        self.state.last_updated = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&self.state)?;

        write_atomic(&self.path, &bytes).map_err(|source| ProgressError::Persist {
            path: self.path.clone(),
            source,
        })?;

        tracing::trace!("Persisted progress to {}", self.path.display());
        Ok(())
    }

    /// Non-terminal entries recorded under any of the given partitions
    ///
    /// Used to re-queue entries a partial catalog did not rediscover.
    pub fn unfinished_in(&self, partitions: &[String]) -> Vec<(String, String)> {
        let wanted: HashSet<&str> = partitions.iter().map(String::as_str).collect();
        self.state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.status.is_terminal())
            .filter_map(|(id, entry)| {
                let partition = entry.partition.as_deref()?;
                wanted
                    .contains(partition)
                    .then(|| (id.clone(), partition.to_string()))
            })
            .collect()
    }

    /// Entries currently failed, with their last error
    pub fn failures(&self) -> Vec<(String, EntryProgress)> {
        self.state
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == EntryStatus::Failed)
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Some(Path::new(".")),
        other => other,
    }
}
