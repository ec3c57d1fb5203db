//! S3-compatible object storage
//!
//! Objects live at `<bucket>/<key>` on the configured endpoint. Requests are
//! signed with whatever credentials the environment provides
//! (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`,
//! `AWS_REGION`, ...). A single `PUT` is published by the store only once the
//! whole body has been received.

use crate::storage::traits::{AssetStore, StorageError, StorageResult};
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutOptions, PutPayload, RetryConfig,
};
use std::time::Duration;

#[derive(Debug)]
pub struct S3Store {
    inner: AmazonS3,
    bucket: String,
    content_type: String,
}

impl S3Store {
    /// Opens `bucket` at `endpoint` with credentials taken from the environment
    pub fn from_env(
        endpoint: &str,
        bucket: &str,
        content_type: impl Into<String>,
        timeout: Duration,
    ) -> StorageResult<Self> {
        Self::with_builder(
            AmazonS3Builder::from_env(),
            endpoint,
            bucket,
            content_type,
            timeout,
        )
    }

    /// Opens `bucket` at `endpoint` on top of a prepared builder
    ///
    /// # Arguments
    ///
    /// * `builder` - Carries credentials and region
    /// * `endpoint` - Base URL of the S3-compatible service; objects are addressed path-style
    /// * `bucket` - Destination bucket
    /// * `content_type` - Content type stored with every object
    /// * `timeout` - Per-request timeout
    pub fn with_builder(
        builder: AmazonS3Builder,
        endpoint: &str,
        bucket: &str,
        content_type: impl Into<String>,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let inner = builder
            .with_endpoint(endpoint)
            .with_bucket_name(bucket)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_client_options(ClientOptions::new().with_timeout(timeout))
            // Every attempt goes through the upload leg's RetryPolicy instead.
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            })
            .build()
            .map_err(|e| StorageError::Permanent {
                key: bucket.to_string(),
                reason: format!("cannot open bucket: {}", e),
            })?;

        Ok(Self {
            inner,
            bucket: bucket.to_string(),
            content_type: content_type.into(),
        })
    }
}

fn object_path(key: &str) -> StorageResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| StorageError::Permanent {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Maps a store error onto the transient/permanent split
///
/// `Generic` covers timeouts, connection failures and server errors; the
/// other variants (not found, forbidden, bad path, ...) will not change on a
/// retry.
fn classify(key: &str, error: object_store::Error) -> StorageError {
    let reason = error.to_string();
    match error {
        object_store::Error::Generic { .. } => StorageError::Transient {
            key: key.to_string(),
            reason,
        },
        _ => StorageError::Permanent {
            key: key.to_string(),
            reason,
        },
    }
}

#[async_trait]
impl AssetStore for S3Store {
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = object_path(key)?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, self.content_type.clone().into());

        self.inner
            .put_opts(
                &path,
                PutPayload::from(bytes.to_vec()),
                PutOptions::from(attributes),
            )
            .await
            .map_err(|e| classify(key, e))?;

        tracing::debug!(key, bucket = %self.bucket, "object stored");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = object_path(key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(classify(key, e)),
        }
    }

    fn locate(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Retryable;
    use wiremock::matchers::{body_bytes, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> S3Store {
        let credentials = AmazonS3Builder::new()
            .with_region("us-east-1")
            .with_access_key_id("harvester")
            .with_secret_access_key("secret");
        S3Store::with_builder(
            credentials,
            &server.uri(),
            "videos",
            "video/mp4",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_is_signed_and_typed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/videos/a/apple.mp4"))
            .and(header("content-type", "video/mp4"))
            .and(header_exists("authorization"))
            .and(body_bytes(b"bytes".to_vec()))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"e1\""))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).put("a/apple.mp4", b"bytes").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let authorization = requests[0].headers.get("authorization").unwrap();
        assert!(authorization
            .to_str()
            .unwrap()
            .starts_with("AWS4-HMAC-SHA256 Credential=harvester/"));
    }

    #[tokio::test]
    async fn test_put_classifies_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/videos/a/busy.mp4"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/videos/a/denied.mp4"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = store(&server);
        let busy = store.put("a/busy.mp4", b"x").await.unwrap_err();
        assert!(busy.is_transient());

        let denied = store.put("a/denied.mp4", b"x").await.unwrap_err();
        assert!(!denied.is_transient());
    }

    #[tokio::test]
    async fn test_exists_uses_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/videos/a/apple.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"e1\"")
                    .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .insert_header("content-length", "5"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/videos/a/absent.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        assert!(store.exists("a/apple.mp4").await.unwrap());
        assert!(!store.exists("a/absent.mp4").await.unwrap());
    }

    #[test]
    fn test_locate() {
        let store = S3Store::with_builder(
            AmazonS3Builder::new()
                .with_region("us-east-1")
                .with_access_key_id("harvester")
                .with_secret_access_key("secret"),
            "https://objects.example.com",
            "videos",
            "video/mp4",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(store.locate("b/ball.mp4"), "s3://videos/b/ball.mp4");
    }
}
