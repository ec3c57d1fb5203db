//! Storage traits and error types
//!
//! This module defines the trait interface for asset destinations and the
//! errors they report.

use crate::crawler::Retryable;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while writing or probing assets
#[derive(Debug, Error)]
pub enum StorageError {
    /// Timeout, connection failure or server-side error; worth retrying
    #[error("transient storage failure for {key}: {reason}")]
    Transient { key: String, reason: String },

    /// Rejected request (bad bucket, forbidden, ...); retrying will not help
    #[error("storage rejected {key}: {reason}")]
    Permanent { key: String, reason: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Permanent { .. } => false,
            Self::Io { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for transferred assets
///
/// Implementations must make `put` atomic from a reader's point of view: an
/// object under `key` is either absent or complete.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing nothing partially
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Returns true if a complete object is already stored under `key`
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Human-readable location of `key`, used in logs
    fn locate(&self, key: &str) -> String;
}
