//! Storage module for persisting harvested assets
//!
//! This module handles every durable write the harvester makes, including:
//! - The asset destination trait and its local and object-store backends
//! - Temp-file-then-rename writes shared with the progress and metadata files
//! - Destination key layout

pub mod atomic;
mod local;
mod object;
mod traits;

pub use local::LocalStore;
pub use object::S3Store;
pub use traits::{AssetStore, StorageError, StorageResult};

use crate::config::{StorageBackend, StorageConfig, TimeoutConfig};
use crate::url::key_segment;
use crate::{ConfigError, HarvestError};
use std::sync::Arc;

/// Builds the asset store selected by the configuration
///
/// # Arguments
///
/// * `config` - The storage section of the configuration
/// * `timeouts` - Per-leg timeouts; the upload timeout applies to object stores
///
/// Object-store credentials come from the environment.
pub fn open_asset_store(
    config: &StorageConfig,
    timeouts: &TimeoutConfig,
) -> Result<Arc<dyn AssetStore>, HarvestError> {
    match config.backend {
        StorageBackend::Local => {
            let root = config.local_dir.as_deref().ok_or_else(|| {
                ConfigError::Validation("storage.local-dir is not set".to_string())
            })?;
            tracing::info!("Storing videos under {}", root);
            Ok(Arc::new(LocalStore::new(root)))
        }
        StorageBackend::ObjectStore => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ConfigError::Validation("storage.endpoint is not set".to_string())
            })?;
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::Validation("storage.bucket is not set".to_string())
            })?;
            tracing::info!("Storing videos in bucket {} at {}", bucket, endpoint);
            let store = S3Store::from_env(
                endpoint,
                bucket,
                config.content_type.clone(),
                timeouts.upload(),
            )?;
            Ok(Arc::new(store))
        }
    }
}

/// Destination key of an entry: `<partition>/<name>.<ext>`
///
/// The same key addresses both backends.
pub fn asset_key(partition: &str, name: &str, ext: &str) -> String {
    format!("{}/{}.{}", partition, key_segment(name), ext)
}
