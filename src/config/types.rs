use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sign-Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Replaces the configured partitions, lowercasing each key
    pub fn override_letters(&mut self, letters: &[String]) {
        self.site.letters = letters.iter().map(|l| l.trim().to_lowercase()).collect();
    }
}

/// Target site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site root, e.g. `https://www.signasl.org`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Partition keys to crawl (dictionary letters)
    #[serde(default = "default_letters")]
    pub letters: Vec<String>,
}

fn default_letters() -> Vec<String> {
    ('a'..='z').map(|c| c.to_string()).collect()
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    #[serde(default = "default_worker_count")]
    pub count: u32,

    /// Delay applied by a worker before every page request (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Persist the progress file after this many result events
    #[serde(rename = "persist-every", default = "default_persist_every")]
    pub persist_every: u32,
}

fn default_worker_count() -> u32 {
    4
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_persist_every() -> u32 {
    1
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            request_delay_ms: default_request_delay_ms(),
            persist_every: default_persist_every(),
        }
    }
}

impl WorkerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Shape of the delay curve between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Always `base-delay`
    Fixed,
    /// `base-delay * attempt`
    Linear,
    /// `base-delay * 2^(attempt - 1)`
    Exponential,
}

/// Retry configuration shared by the fetch, download and upload legs
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per leg, including the first one
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff")]
    pub backoff: Backoff,

    /// Accumulated attempts across runs after which a failed entry is no
    /// longer queued
    #[serde(
        rename = "entry-attempt-ceiling",
        default = "default_entry_attempt_ceiling"
    )]
    pub entry_attempt_ceiling: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff() -> Backoff {
    Backoff::Linear
}

fn default_entry_attempt_ceiling() -> u32 {
    9
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: default_backoff(),
            entry_attempt_ceiling: default_entry_attempt_ceiling(),
        }
    }
}

/// Per-leg timeouts, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(rename = "page-secs", default = "default_page_secs")]
    pub page_secs: u64,

    #[serde(rename = "download-secs", default = "default_transfer_secs")]
    pub download_secs: u64,

    #[serde(rename = "upload-secs", default = "default_transfer_secs")]
    pub upload_secs: u64,

    #[serde(rename = "connect-secs", default = "default_connect_secs")]
    pub connect_secs: u64,
}

fn default_page_secs() -> u64 {
    30
}

fn default_transfer_secs() -> u64 {
    60
}

fn default_connect_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_secs: default_page_secs(),
            download_secs: default_transfer_secs(),
            upload_secs: default_transfer_secs(),
            connect_secs: default_connect_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn page(&self) -> Duration {
        Duration::from_secs(self.page_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL or address where site operators can reach the operator
    #[serde(default)]
    pub contact: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SignHarvester".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact: None,
        }
    }
}

impl UserAgentConfig {
    /// Format: `Name/Version (+contact)`
    pub fn header_value(&self) -> String {
        match &self.contact {
            Some(contact) => format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, contact
            ),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Root directory for per-sign metadata files
    #[serde(rename = "metadata-dir")]
    pub metadata_dir: String,

    /// Path of the progress file
    #[serde(rename = "progress-path")]
    pub progress_path: String,

    /// Extension of metadata files
    #[serde(rename = "metadata-ext", default = "default_metadata_ext")]
    pub metadata_ext: String,
}

fn default_metadata_ext() -> String {
    "json".to_string()
}

/// Which asset store receives the videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Local,
    ObjectStore,
}

/// Asset destination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory for the local backend
    #[serde(rename = "local-dir", default)]
    pub local_dir: Option<String>,

    /// S3-compatible endpoint for the object-store backend; credentials come
    /// from the environment
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(rename = "asset-ext", default = "default_asset_ext")]
    pub asset_ext: String,

    #[serde(rename = "content-type", default = "default_content_type")]
    pub content_type: String,
}

fn default_asset_ext() -> String {
    "mp4".to_string()
}

fn default_content_type() -> String {
    "video/mp4".to_string()
}

/// Periodic version-control synchronisation
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Sync after this many terminal entries
    #[serde(default = "default_sync_every")]
    pub every: u32,

    /// Working tree to commit in
    #[serde(rename = "repo-path", default = "default_repo_path")]
    pub repo_path: String,

    /// Remote to push to; no push when absent
    #[serde(default)]
    pub remote: Option<String>,
}

fn default_sync_every() -> u32 {
    50
}

fn default_repo_path() -> String {
    ".".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            every: default_sync_every(),
            repo_path: default_repo_path(),
            remote: None,
        }
    }
}
