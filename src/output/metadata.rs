//! Per-sign metadata files
//!
//! Each completed sign gets `<dir>/<partition>/<name>.<ext>`, a pretty-printed
//! JSON copy of its [`SignRecord`], written atomically.

use crate::state::SignRecord;
use crate::storage::atomic::write_atomic;
use crate::url::key_segment;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to serialize metadata for {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write metadata to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes metadata files below one directory
#[derive(Debug, Clone)]
pub struct MetadataWriter {
    dir: PathBuf,
    ext: String,
}

impl MetadataWriter {
    pub fn new(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ext: ext.into(),
        }
    }

    pub fn path_for(&self, record: &SignRecord) -> PathBuf {
        self.dir
            .join(key_segment(&record.partition))
            .join(format!("{}.{}", key_segment(&record.sign_name), self.ext))
    }

    /// Writes the record and returns the path of the file
    pub async fn write(&self, record: &SignRecord) -> Result<PathBuf, MetadataError> {
        let path = self.path_for(record);
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| MetadataError::Serialize {
            name: record.sign_name.clone(),
            source,
        })?;

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomic(&target, &bytes)).await;

        match written {
            Ok(Ok(())) => Ok(path),
            Ok(Err(source)) => Err(MetadataError::Io { path, source }),
            Err(join) => Err(MetadataError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::Other, join),
            }),
        }
    }
}
