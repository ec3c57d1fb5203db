//! Task discovery
//!
//! Walks the paginated dictionary listing of every selected letter and turns
//! the sign links it finds into [`CatalogEntry`] values.

use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::parser::parse_listing;
use crate::crawler::retry::RetryFailure;
use crate::state::CatalogEntry;
use crate::url::{detail_url, listing_url};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

#[derive(Debug, Error)]
enum ListingError {
    #[error("invalid listing locator: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Fetch(RetryFailure<FetchError>),
}

/// Result of discovery
#[derive(Debug, Default)]
pub struct Catalog {
    /// Entries in discovery order, unique by name
    pub entries: Vec<CatalogEntry>,

    /// Letters whose listing could not be read to the end
    pub failed_partitions: Vec<String>,
}

/// Discovers catalog entries partition by partition
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    fetcher: PageFetcher,
    base: Url,
}

impl TaskCatalog {
    pub fn new(fetcher: PageFetcher, base: Url) -> Self {
        Self { fetcher, base }
    }

    /// Lists every letter in order
    ///
    /// A name seen under an earlier letter (or earlier page) wins; later
    /// duplicates are dropped. A letter whose listing fails is abandoned with
    /// the entries found on its earlier pages kept, and discovery moves on.
    /// Discovery stops between pages once `shutdown` is raised.
    pub async fn discover(&self, letters: &[String], shutdown: &watch::Receiver<bool>) -> Catalog {
        let mut catalog = Catalog::default();
        let mut seen = HashSet::new();

        for letter in letters {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, stopping discovery before letter {}", letter);
                break;
            }

            let before = catalog.entries.len();
            let result = self
                .list_partition(letter, &mut seen, &mut catalog.entries, shutdown)
                .await;
            let found = catalog.entries.len() - before;

            match result {
                Ok(pages) => {
                    tracing::info!(letter = %letter, pages, "Found {} signs", found);
                }
                Err(e) => {
                    tracing::warn!(
                        letter = %letter,
                        "Abandoning letter after {} signs: {}",
                        found,
                        e
                    );
                    catalog.failed_partitions.push(letter.clone());
                }
            }
        }

        tracing::info!(
            "Discovery finished: {} signs across {} letters",
            catalog.entries.len(),
            letters.len()
        );
        catalog
    }

    /// Lists one letter, returning the number of pages read
    async fn list_partition(
        &self,
        letter: &str,
        seen: &mut HashSet<String>,
        entries: &mut Vec<CatalogEntry>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<u32, ListingError> {
        let first = self.list_page(letter, 1, seen, entries).await?;
        let last_page = first.unwrap_or(1);
        tracing::debug!(letter, last_page, "listing pages");

        for page in 2..=last_page {
            if *shutdown.borrow() {
                return Ok(page - 1);
            }
            self.list_page(letter, page, seen, entries).await?;
        }

        Ok(last_page)
    }

    /// Lists one page and returns its pagination's highest page number
    async fn list_page(
        &self,
        letter: &str,
        page: u32,
        seen: &mut HashSet<String>,
        entries: &mut Vec<CatalogEntry>,
    ) -> Result<Option<u32>, ListingError> {
        let url = listing_url(&self.base, letter, page)?;
        let html = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(ListingError::Fetch)?
            .value;

        let listing = parse_listing(&html, &url, letter);
        if listing.names.is_empty() {
            tracing::debug!(url = %url, "listing page has no sign links");
        }

        for name in listing.names {
            if !seen.insert(name.clone()) {
                tracing::debug!(sign = %name, letter, "duplicate sign dropped");
                continue;
            }
            let detail = detail_url(&self.base, &name)?;
            entries.push(CatalogEntry::new(name, letter, detail.to_string()));
        }

        Ok(listing.last_page)
    }
}
