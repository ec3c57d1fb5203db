//! Periodic synchronisation of harvested metadata
//!
//! After every few finished signs the new metadata files and the progress
//! file are handed to a [`SyncTarget`]. The stock target commits them to a git
//! working tree and optionally pushes. Sync problems never stop a harvest.

use crate::state::EntryStatus;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Destination of periodic syncs
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Records `paths` under `message`
    async fn sync(&self, paths: &[PathBuf], message: &str) -> Result<(), SyncError>;
}

/// Commits to a git working tree through the `git` executable
#[derive(Debug, Clone)]
pub struct GitSync {
    repo: PathBuf,
    remote: Option<String>,
}

impl GitSync {
    pub fn new(repo: impl Into<PathBuf>, remote: Option<String>) -> Self {
        Self {
            repo: repo.into(),
            remote,
        }
    }

    async fn git<I, S>(&self, args: I) -> Result<Output, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let command = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();

        Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(&args)
            .output()
            .await
            .map_err(|source| SyncError::Spawn { command, source })
    }

    async fn git_ok<I, S>(&self, args: I) -> Result<(), SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = self.git(&args).await?;
        if output.status.success() {
            return Ok(());
        }

        Err(SyncError::Command {
            command: args
                .first()
                .map(|a| a.to_string_lossy().into_owned())
                .unwrap_or_default(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Makes `path` usable from inside the repository regardless of the current directory
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl SyncTarget for GitSync {
    async fn sync(&self, paths: &[PathBuf], message: &str) -> Result<(), SyncError> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut add: Vec<std::ffi::OsString> = vec!["add".into(), "--".into()];
        add.extend(paths.iter().map(|p| absolute(p).into_os_string()));
        self.git_ok(&add).await?;

        // `diff --cached --quiet` exits 0 when nothing is staged.
        let staged = self.git(["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            tracing::debug!("Nothing new to commit");
            return Ok(());
        }

        self.git_ok(["commit", "--quiet", "-m", message]).await?;
        tracing::info!("Git: {}", message);

        if let Some(remote) = &self.remote {
            self.git_ok(["push", "--quiet", remote.as_str()]).await?;
            tracing::debug!(remote = %remote, "pushed");
        }

        Ok(())
    }
}

/// Batches finished signs into periodic syncs
///
/// Periodic syncs run on their own task so a slow commit or push never holds
/// up the results coming in behind it. At most one sync runs at a time.
pub struct SyncScheduler {
    target: Option<Arc<dyn SyncTarget>>,
    every: u64,
    progress_path: PathBuf,
    pending: Vec<PathBuf>,
    since_last: u64,
    total: u64,
    in_flight: Option<JoinHandle<Result<(), Vec<PathBuf>>>>,
}

impl SyncScheduler {
    pub fn new(target: Arc<dyn SyncTarget>, every: u32, progress_path: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(target),
            every: u64::from(every.max(1)),
            progress_path: progress_path.into(),
            pending: Vec::new(),
            since_last: 0,
            total: 0,
            in_flight: None,
        }
    }

    /// A scheduler that never syncs
    pub fn disabled() -> Self {
        Self {
            target: None,
            every: u64::MAX,
            progress_path: PathBuf::new(),
            pending: Vec::new(),
            since_last: 0,
            total: 0,
            in_flight: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Returns true while a background sync has not finished
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns true if a sync is due
    ///
    /// Only completed and skipped signs count; failures will be retried and
    /// are not worth a commit of their own. Nothing is due while the previous
    /// sync is still running; its successor picks up the extra paths.
    pub fn record(&mut self, status: EntryStatus, metadata_path: Option<PathBuf>) -> bool {
        if self.target.is_none() {
            return false;
        }
        if let Some(path) = metadata_path {
            self.pending.push(path);
        }
        if status.is_terminal() {
            self.since_last += 1;
            self.total += 1;
        }
        self.since_last >= self.every && !self.is_busy()
    }

    /// Returns true if anything happened since the last sync
    pub fn has_pending(&self) -> bool {
        self.since_last > 0 || !self.pending.is_empty()
    }

    /// Starts a sync of the pending paths plus the progress file
    ///
    /// Returns without waiting for the target. Does nothing while an earlier
    /// sync is still running. Failures are logged and swallowed; the paths
    /// go back to pending so a later sync picks them up again.
    pub async fn flush(&mut self, message: &str) {
        let Some(target) = self.target.clone() else {
            return;
        };
        if self.is_busy() {
            tracing::debug!("Previous sync still running, deferring");
            return;
        }
        self.reap().await;
        if !self.has_pending() {
            return;
        }

        let paths = self.take_batch();
        let message = message.to_string();
        self.in_flight = Some(tokio::spawn(run_sync(target, paths, message)));
    }

    /// Waits for a running sync, then syncs whatever is still pending
    pub async fn finish(&mut self, message: &str) {
        self.reap().await;
        let Some(target) = self.target.clone() else {
            return;
        };
        if !self.has_pending() {
            return;
        }

        let paths = self.take_batch();
        if let Err(paths) = run_sync(target, paths, message.to_string()).await {
            self.restore(paths);
        }
    }

    /// Message for a periodic sync
    pub fn progress_message(&self) -> String {
        format!("Progress: {} signs harvested", self.total)
    }

    async fn reap(&mut self) {
        let Some(handle) = self.in_flight.take() else {
            return;
        };
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(paths)) => self.restore(paths),
            Err(e) => tracing::warn!("Sync task failed: {}", e),
        }
    }

    fn take_batch(&mut self) -> Vec<PathBuf> {
        self.since_last = 0;
        let mut paths = std::mem::take(&mut self.pending);
        paths.push(self.progress_path.clone());
        paths
    }

    fn restore(&mut self, mut paths: Vec<PathBuf>) {
        paths.retain(|p| p != &self.progress_path);
        paths.append(&mut self.pending);
        self.pending = paths;
    }
}

async fn run_sync(
    target: Arc<dyn SyncTarget>,
    paths: Vec<PathBuf>,
    message: String,
) -> Result<(), Vec<PathBuf>> {
    match target.sync(&paths, &message).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!("Sync failed, continuing: {}", e);
            Err(paths)
        }
    }
}
