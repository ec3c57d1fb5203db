//! Asset transfer
//!
//! Moves one video from the site to the asset store: an existence probe, a
//! download and an upload, each leg retried on its own.

use crate::crawler::fetcher::{get_bytes, FetchError};
use crate::crawler::retry::{RetryFailure, RetryPolicy};
use crate::state::SignRecord;
use crate::storage::{AssetStore, StorageError};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// What a successful transfer did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The video was downloaded and stored
    Written { attempts: u32 },

    /// The destination already held the video; nothing was written
    AlreadyPresent { attempts: u32 },
}

impl TransferOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Written { attempts } | Self::AlreadyPresent { attempts } => *attempts,
        }
    }
}

/// Why a transfer failed
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("video locator {0:?} is invalid")]
    Locator(String),

    #[error("download failed: {0}")]
    Download(RetryFailure<FetchError>),

    #[error("checking destination failed: {0}")]
    Probe(RetryFailure<StorageError>),

    #[error("upload failed: {0}")]
    Upload(RetryFailure<StorageError>),
}

impl TransferError {
    /// Attempts consumed by the leg that failed
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Locator(_) => 1,
            Self::Download(failure) => failure.attempts(),
            Self::Probe(failure) | Self::Upload(failure) => failure.attempts(),
        }
    }
}

/// Downloads videos and stores them
#[derive(Clone)]
pub struct AssetTransfer {
    client: Client,
    store: Arc<dyn AssetStore>,
    download_policy: RetryPolicy,
    upload_policy: RetryPolicy,
    download_timeout: Duration,
}

impl AssetTransfer {
    pub fn new(
        client: Client,
        store: Arc<dyn AssetStore>,
        download_policy: RetryPolicy,
        upload_policy: RetryPolicy,
        download_timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            download_policy,
            upload_policy,
            download_timeout,
        }
    }

    /// A transfer whose legs make at most `limit` attempts each
    pub fn capped_at(&self, limit: u32) -> Self {
        Self {
            download_policy: self.download_policy.capped_at(limit),
            upload_policy: self.upload_policy.capped_at(limit),
            ..self.clone()
        }
    }

    /// Transfers the video of `record` to `record.destination_key`
    ///
    /// A destination that already exists is never written again, so a
    /// restarted run cannot duplicate a finished transfer. The existence
    /// check talks to the same store as the upload and shares its policy,
    /// but is logged and reported as its own leg. The reported attempts are
    /// the highest attempt number reached by any leg.
    pub async fn transfer(&self, record: &SignRecord) -> Result<TransferOutcome, TransferError> {
        let key = record.destination_key.as_str();

        let probe = self
            .upload_policy
            .run(&format!("exists {}", key), |_| self.store.exists(key))
            .await
            .map_err(TransferError::Probe)?;

        if probe.value {
            tracing::info!(sign = %record.sign_name, key, "video already stored, skipping transfer");
            return Ok(TransferOutcome::AlreadyPresent {
                attempts: probe.attempts,
            });
        }

        let source = Url::parse(&record.video_url)
            .map_err(|_| TransferError::Locator(record.video_url.clone()))?;

        let download = self
            .download_policy
            .run(source.as_str(), |_| {
                get_bytes(&self.client, &source, self.download_timeout)
            })
            .await
            .map_err(TransferError::Download)?;

        let bytes = download.value;
        tracing::debug!(sign = %record.sign_name, size = bytes.len(), "video downloaded");

        let upload = self
            .upload_policy
            .run(&format!("put {}", key), |_| self.store.put(key, &bytes))
            .await
            .map_err(TransferError::Upload)?;

        tracing::debug!(
            sign = %record.sign_name,
            location = %self.store.locate(key),
            "video stored"
        );

        Ok(TransferOutcome::Written {
            attempts: probe.attempts.max(download.attempts).max(upload.attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use crate::storage::LocalStore;
    use chrono::Utc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1), Backoff::Fixed)
    }

    fn transfer(root: &std::path::Path) -> AssetTransfer {
        AssetTransfer::new(
            Client::new(),
            Arc::new(LocalStore::new(root)),
            policy(),
            policy(),
            Duration::from_secs(5),
        )
    }

    fn record(video_url: String) -> SignRecord {
        SignRecord {
            sign_name: "apple".to_string(),
            partition: "a".to_string(),
            page_url: "https://www.signasl.org/sign/apple".to_string(),
            video_url,
            destination_key: "a/apple.mp4".to_string(),
            description: None,
            similar_signs: Vec::new(),
            categories: Vec::new(),
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_downloads_and_stores() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apple.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let outcome = transfer(dir.path())
            .transfer(&record(format!("{}/apple.mp4", server.uri())))
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Written { attempts: 1 });
        assert_eq!(std::fs::read(dir.path().join("a/apple.mp4")).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_existing_destination_is_not_rewritten() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apple.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/apple.mp4"), b"old").unwrap();

        let outcome = transfer(dir.path())
            .transfer(&record(format!("{}/apple.mp4", server.uri())))
            .await
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::AlreadyPresent { .. }));
        assert_eq!(std::fs::read(dir.path().join("a/apple.mp4")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_download_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apple.mp4"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = transfer(dir.path())
            .transfer(&record(format!("{}/apple.mp4", server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Download(_)));
        assert_eq!(err.attempts(), 3);
        assert!(!dir.path().join("a/apple.mp4").exists());
    }

    #[tokio::test]
    async fn test_missing_video_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apple.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = transfer(dir.path())
            .transfer(&record(format!("{}/apple.mp4", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert!(err.to_string().contains("HTTP 404"));
    }

    struct UnreachableStore;

    #[async_trait::async_trait]
    impl AssetStore for UnreachableStore {
        async fn put(&self, key: &str, _bytes: &[u8]) -> crate::storage::StorageResult<()> {
            panic!("put called for {}", key);
        }

        async fn exists(&self, key: &str) -> crate::storage::StorageResult<bool> {
            Err(StorageError::Transient {
                key: key.to_string(),
                reason: "connection reset".to_string(),
            })
        }

        fn locate(&self, key: &str) -> String {
            key.to_string()
        }
    }

    #[tokio::test]
    async fn test_existence_check_failure_is_its_own_leg() {
        let transfer = AssetTransfer::new(
            Client::new(),
            Arc::new(UnreachableStore),
            policy(),
            policy(),
            Duration::from_secs(5),
        );

        let err = transfer
            .transfer(&record("http://127.0.0.1:9/apple.mp4".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Probe(_)));
        assert_eq!(err.attempts(), 3);
        assert!(err.to_string().starts_with("checking destination failed"));
    }

    #[tokio::test]
    async fn test_capped_transfer_stops_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apple.mp4"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = transfer(dir.path())
            .capped_at(1)
            .transfer(&record(format!("{}/apple.mp4", server.uri())))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Download(_)));
        assert_eq!(err.attempts(), 1);
    }
}
