//! Catalog entries and extracted sign records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discovered unit of work
///
/// Immutable once discovered; `name` is the canonical key across the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Canonical sign name, as it appears in `/sign/<name>`
    pub name: String,

    /// Partition (dictionary letter) the entry was found under
    pub partition: String,

    /// Locator of the detail page
    pub detail_url: String,
}

impl CatalogEntry {
    pub fn new(
        name: impl Into<String>,
        partition: impl Into<String>,
        detail_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            detail_url: detail_url.into(),
        }
    }
}

/// Structured output extracted from one detail page
///
/// Serialized verbatim as the per-sign metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRecord {
    pub sign_name: String,
    pub partition: String,
    pub page_url: String,

    /// Source locator of the video
    pub video_url: String,

    /// `<partition>/<name>.<asset-ext>` in the asset store
    pub destination_key: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub similar_signs: Vec<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    pub scraped_at: DateTime<Utc>,
}
