/// Entry status definitions for tracking harvest progress
///
/// This module defines every status a catalog entry can hold in the progress file.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    // ===== Active States =====
    /// Entry has been discovered but not yet processed
    Pending,

    /// A worker is currently processing the entry
    InProgress,

    // ===== Terminal States =====
    /// Video transferred and metadata written
    Completed,

    /// Detail page structurally lacks a video; no retry can help
    Skipped,

    // ===== Retriable State =====
    /// Processing failed; retried on a later run while below the attempt ceiling
    Failed,
}

impl EntryStatus {
    /// Returns true if the entry must never be processed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Returns true if the entry may still be picked up by a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Returns true if `next` is a legal successor of this status
    ///
    /// `pending → in_progress → {completed, failed, skipped}`, and `failed` may
    /// re-enter `in_progress`. Terminal statuses accept nothing.
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::InProgress) => true,
            (Self::Failed, Self::InProgress) => true,
            // An interrupted run may leave an entry in progress; it restarts.
            (Self::InProgress, Self::InProgress) => true,
            (Self::InProgress, Self::Completed | Self::Failed | Self::Skipped) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn all_states() -> [Self; 5] {
        [
            Self::Pending,
            Self::InProgress,
            Self::Completed,
            Self::Skipped,
            Self::Failed,
        ]
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
