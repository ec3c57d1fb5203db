//! Integration tests for the harvest pipeline
//!
//! These tests use wiremock to stand in for the dictionary site and the
//! video host, and run full harvests end-to-end against a scratch directory.

use async_trait::async_trait;
use sign_harvester::config::{
    Backoff, Config, OutputConfig, RetryConfig, SiteConfig, StorageBackend, StorageConfig,
    SyncConfig, TimeoutConfig, UserAgentConfig, WorkerConfig,
};
use sign_harvester::crawler::{Coordinator, SyncError, SyncTarget};
use sign_harvester::state::{CatalogEntry, EntryEvent, EntryStatus, ProgressStore};
use object_store::aws::AmazonS3Builder;
use sign_harvester::storage::{AssetStore, LocalStore, S3Store};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock site
fn create_test_config(base_url: &str, dir: &Path, letters: &[&str]) -> Config {
    Config {
        site: SiteConfig {
            base_url: base_url.to_string(),
            letters: letters.iter().map(|l| l.to_string()).collect(),
        },
        workers: WorkerConfig {
            count: 2,
            request_delay_ms: 0,
            persist_every: 1,
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff: Backoff::Linear,
            entry_attempt_ceiling: 9,
        },
        timeouts: TimeoutConfig {
            page_secs: 5,
            download_secs: 5,
            upload_secs: 5,
            connect_secs: 5,
        },
        user_agent: UserAgentConfig::default(),
        output: OutputConfig {
            metadata_dir: dir.join("metadata").display().to_string(),
            progress_path: dir.join("progress.json").display().to_string(),
            metadata_ext: "json".to_string(),
        },
        storage: StorageConfig {
            backend: StorageBackend::Local,
            local_dir: Some(dir.join("videos").display().to_string()),
            endpoint: None,
            bucket: None,
            asset_ext: "mp4".to_string(),
            content_type: "video/mp4".to_string(),
        },
        sync: SyncConfig::default(),
    }
}

fn listing_page(signs: &[&str]) -> String {
    let links: String = signs
        .iter()
        .map(|s| format!(r#"<li><a href="/sign/{s}">{s}</a></li>"#))
        .collect();
    format!("<html><body><ul>{links}</ul></body></html>")
}

fn detail_page(base_url: &str, sign: &str) -> String {
    format!(
        r#"<html><head>
            <meta property="og:video" content="{base_url}/media/{sign}.mp4">
        </head><body>
            <div class="featurette-heading-sub">How to sign {sign}</div>
            <div>Categories: <a href="/category/test">test</a></div>
        </body></html>"#
    )
}

const NO_VIDEO_PAGE: &str =
    r#"<html><head><title>e3</title></head><body><div class="featurette-heading-sub">Text only</div></body></html>"#;

/// Mounts the e1/e2/e3 site: e2's page fails twice before succeeding and e3
/// has no video
async fn mount_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/dictionary/e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["e1", "e2", "e3"])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sign/e1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e1")))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sign/e2"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e2")))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sign/e3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(NO_VIDEO_PAGE))
        .mount(server)
        .await;

    for sign in ["e1", "e2"] {
        Mock::given(method("GET"))
            .and(path(format!("/media/{sign}.mp4")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("video of {sign}").into_bytes()))
            .mount(server)
            .await;
    }
}

fn read_progress(dir: &Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(dir.join("progress.json")).expect("progress file");
    serde_json::from_str(&raw).expect("valid progress JSON")
}

async fn requests_to(server: &MockServer, p: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == p)
        .count()
}

async fn run(config: Config, fresh: bool) -> sign_harvester::RunSummary {
    let (_tx, rx) = watch::channel(false);
    Coordinator::new(config, fresh)
        .expect("coordinator")
        .run(rx)
        .await
        .expect("harvest")
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();

    let summary = run(create_test_config(&server.uri(), dir.path(), &["e"]), false).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.unfinished, 0);

    let progress = read_progress(dir.path());
    assert_eq!(progress["entries"]["e1"]["status"], "completed");
    assert_eq!(progress["entries"]["e2"]["status"], "completed");
    assert_eq!(progress["entries"]["e2"]["attempts"], 3);
    assert_eq!(progress["entries"]["e3"]["status"], "skipped");
    assert_eq!(progress["stats"]["completed"], 2);
    assert_eq!(progress["stats"]["total"], 3);

    let video = std::fs::read(dir.path().join("videos/e/e1.mp4")).unwrap();
    assert_eq!(video, b"video of e1");
    assert!(dir.path().join("videos/e/e2.mp4").exists());
    assert!(!dir.path().join("videos/e/e3.mp4").exists());

    let metadata: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("metadata/e/e1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata["sign_name"], "e1");
    assert_eq!(metadata["destination_key"], "e/e1.mp4");
    assert_eq!(metadata["description"], "How to sign e1");
    assert_eq!(metadata["categories"], serde_json::json!(["test"]));
    assert_eq!(metadata["similar_signs"], serde_json::json!([]));
    assert!(!dir.path().join("metadata/e/e3.json").exists());
}

#[tokio::test]
async fn test_resume_skips_completed_and_restarts_interrupted() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    // A previous run finished e1 and crashed while e2 was in flight.
    {
        let mut store = ProgressStore::fresh(dir.path().join("progress.json"));
        let e1 = CatalogEntry::new("e1", "e", format!("{base}/sign/e1"));
        let e2 = CatalogEntry::new("e2", "e", format!("{base}/sign/e2"));
        store.register(&e1);
        store.register(&e2);
        store.mark_in_progress("e1").unwrap();
        store.apply(&EntryEvent::completed(&e1, 1)).unwrap();
        store.mark_in_progress("e2").unwrap();
        store.persist().unwrap();
    }
    std::fs::write(dir.path().join(".tmpcrash.partial"), b"{\"entries\":").unwrap();

    Mock::given(method("GET"))
        .and(path("/dictionary/e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["e1", "e2"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e1")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/e2.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"e2".to_vec()))
        .mount(&server)
        .await;

    let summary = run(create_test_config(&base, dir.path(), &["e"]), false).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.total, 2);
    assert_eq!(read_progress(dir.path())["entries"]["e2"]["status"], "completed");
    assert!(!dir.path().join(".tmpcrash.partial").exists());
    server.verify().await;
}

#[tokio::test]
async fn test_attempt_ceiling_below_needed_attempts() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();

    let mut config = create_test_config(&server.uri(), dir.path(), &["e"]);
    config.retry.max_attempts = 2;
    config.retry.entry_attempt_ceiling = 2;

    let summary = run(config.clone(), false).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].sign, "e2");
    assert!(summary.failures[0].reason.contains("HTTP 500"));

    let progress = read_progress(dir.path());
    assert_eq!(progress["entries"]["e2"]["status"], "failed");
    assert_eq!(progress["entries"]["e2"]["attempts"], 2);

    // Out of attempts: a second run leaves e2 alone.
    let summary = run(config, false).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(requests_to(&server, "/sign/e2").await, 2);
    assert_eq!(requests_to(&server, "/sign/e1").await, 1);
}

#[tokio::test]
async fn test_attempt_ceiling_holds_across_runs() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/dictionary/e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["e2"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e2"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e2")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/e2.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&base, dir.path(), &["e"]);
    config.retry.max_attempts = 3;
    config.retry.entry_attempt_ceiling = 4;

    // First run spends a full retry cycle.
    let summary = run(config.clone(), false).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(read_progress(dir.path())["entries"]["e2"]["attempts"], 3);

    // Second run may only spend what is left under the ceiling.
    let summary = run(config.clone(), false).await;
    assert_eq!(summary.failed, 1);
    let progress = read_progress(dir.path());
    assert_eq!(progress["entries"]["e2"]["status"], "failed");
    assert_eq!(progress["entries"]["e2"]["attempts"], 4);
    assert_eq!(requests_to(&server, "/sign/e2").await, 4);

    // At the ceiling: the page is not requested again.
    run(config, false).await;
    assert_eq!(requests_to(&server, "/sign/e2").await, 4);
    assert_eq!(requests_to(&server, "/media/e2.mp4").await, 0);
}

#[tokio::test]
async fn test_missing_detail_page_is_skipped_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dictionary/g"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["gone"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), &["g"]);

    let summary = run(config.clone(), false).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);

    let summary = run(config, false).await;
    assert_eq!(summary.skipped, 1);

    let progress = read_progress(dir.path());
    assert_eq!(progress["entries"]["gone"]["status"], "skipped");
    assert_eq!(progress["entries"]["gone"]["attempts"], 1);
    assert_eq!(requests_to(&server, "/sign/gone").await, 1);
}

#[tokio::test]
async fn test_failed_partition_does_not_stop_the_run() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    Mock::given(method("GET"))
        .and(path("/dictionary/d"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let summary = run(create_test_config(&server.uri(), dir.path(), &["d", "e"]), false).await;

    assert_eq!(summary.failed_partitions, vec!["d".to_string()]);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.total, 3);
}

#[tokio::test]
async fn test_existing_video_is_never_rewritten() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/dictionary/e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["e1"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sign/e1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&base, "e1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/e1.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("videos/e")).unwrap();
    std::fs::write(dir.path().join("videos/e/e1.mp4"), b"old").unwrap();

    let summary = run(create_test_config(&base, dir.path(), &["e"]), false).await;

    assert_eq!(summary.completed, 1);
    assert_eq!(std::fs::read(dir.path().join("videos/e/e1.mp4")).unwrap(), b"old");
    assert!(dir.path().join("metadata/e/e1.json").exists());
    server.verify().await;
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_entries_only() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/dictionary/e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["e1", "e2", "e3"])))
        .mount(&server)
        .await;
    for sign in ["e1", "e2", "e3"] {
        Mock::given(method("GET"))
            .and(path(format!("/sign/{sign}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(detail_page(&base, sign))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/media/{sign}.mp4")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"v".to_vec()))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&base, dir.path(), &["e"]);
    config.workers.count = 1;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send_replace(true);
        // Keep the sender alive until the run is over.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let summary = Coordinator::new(config, false)
        .unwrap()
        .run(rx)
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.unfinished, 2);

    let progress = read_progress(dir.path());
    let statuses: Vec<_> = ["e1", "e2", "e3"]
        .iter()
        .map(|s| progress["entries"][*s]["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["completed", "pending", "pending"]);
    assert!(!statuses.iter().any(|s| s == EntryStatus::InProgress.as_str()));
}

#[tokio::test]
async fn test_object_store_backend() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    for sign in ["e1", "e2"] {
        Mock::given(method("HEAD"))
            .and(path(format!("/videos/e/{sign}.mp4")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/videos/e/{sign}.mp4")))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", format!("\"{sign}\"")))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), &["e"]);
    let store: Arc<dyn AssetStore> = Arc::new(
        S3Store::with_builder(
            AmazonS3Builder::new()
                .with_region("us-east-1")
                .with_access_key_id("harvester")
                .with_secret_access_key("secret"),
            &server.uri(),
            "videos",
            "video/mp4",
            Duration::from_secs(5),
        )
        .unwrap(),
    );

    let (_tx, rx) = watch::channel(false);
    let summary = Coordinator::with_collaborators(config, false, store, None)
        .unwrap()
        .run(rx)
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert!(!dir.path().join("videos").exists());
    server.verify().await;
}

#[derive(Default)]
struct RecordingSync {
    calls: Mutex<Vec<(Vec<PathBuf>, String)>>,
}

#[async_trait]
impl SyncTarget for RecordingSync {
    async fn sync(&self, paths: &[PathBuf], message: &str) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((paths.to_vec(), message.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_periodic_and_final_sync() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();

    let mut config = create_test_config(&server.uri(), dir.path(), &["e"]);
    config.sync.every = 2;
    let progress_path = PathBuf::from(&config.output.progress_path);

    let target = Arc::new(RecordingSync::default());
    let store: Arc<dyn AssetStore> = Arc::new(LocalStore::new(dir.path().join("videos")));
    let (_tx, rx) = watch::channel(false);
    Coordinator::with_collaborators(config, false, store, Some(target.clone()))
        .unwrap()
        .run(rx)
        .await
        .unwrap();

    let calls = target.calls.lock().unwrap();
    // Three terminal entries with every = 2: one periodic sync, one final.
    assert_eq!(calls.len(), 2);
    assert!(calls[0].1.starts_with("Progress:"));
    assert!(calls[1].1.starts_with("Final:"));

    let synced: Vec<&PathBuf> = calls.iter().flat_map(|(paths, _)| paths).collect();
    assert!(synced.contains(&&progress_path));
    assert!(synced
        .iter()
        .any(|p| p.ends_with(Path::new("metadata/e/e1.json"))));
    assert!(synced
        .iter()
        .any(|p| p.ends_with(Path::new("metadata/e/e2.json"))));
}
