//! HTML parser for listing and detail pages
//!
//! This module handles parsing HTML content to extract:
//! - Sign links and the last page number from dictionary listing pages
//! - The video locator and descriptive fields from sign detail pages

use crate::state::{CatalogEntry, SignRecord};
use crate::storage::asset_key;
use crate::url::{page_number_from_href, sign_name_from_href};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Labels of the "similar signs" block; the site spells it both ways
const SIMILAR_LABELS: [&str; 2] = ["Similiar / Same:", "Similar / Same:"];
const CATEGORIES_LABELS: [&str; 1] = ["Categories:"];

/// Errors that make a detail page unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no video found on the page for {name}")]
    MissingAsset { name: String },

    #[error("video locator {locator:?} on the page for {name} is invalid")]
    InvalidAsset { name: String, locator: String },
}

/// Extracted information from one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Sign names in document order, without duplicates
    pub names: Vec<String>,

    /// Highest page number linked from the pagination block, if any
    pub last_page: Option<u32>,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn hrefs<'a>(document: &'a Html, css: &str) -> Vec<&'a str> {
    let Some(links) = selector(css) else {
        return Vec::new();
    };
    document
        .select(&links)
        .filter_map(|a| a.value().attr("href"))
        .collect()
}

/// Parses a dictionary listing page
///
/// Sign links are anchors whose path is `/sign/<name>` on the site's host;
/// page links are anchors inside `ul.pagination` of the form
/// `/dictionary/<letter>/<n>`. A page without either yields an empty result.
///
/// # Arguments
///
/// * `html` - The listing page body
/// * `page_url` - Locator of the page, used to resolve relative links
/// * `letter` - The partition being listed
pub fn parse_listing(html: &str, page_url: &Url, letter: &str) -> ListingPage {
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let names = hrefs(&document, "a[href]")
        .into_iter()
        .filter_map(|href| sign_name_from_href(page_url, href))
        .filter(|name| seen.insert(name.clone()))
        .collect();

    let last_page = hrefs(&document, "ul.pagination a[href]")
        .into_iter()
        .filter_map(|href| page_number_from_href(page_url, href, letter))
        .max();

    ListingPage { names, last_page }
}

/// Extracts a [`SignRecord`] from a detail page
///
/// # Extraction Rules
///
/// | Field | Source |
/// |-------|--------|
/// | video | `meta[property=og:video]`, else `meta[name=twitter:player:stream]` |
/// | description | text of `div.featurette-heading-sub` |
/// | similar signs | anchor texts in the div labelled `Similiar / Same:` |
/// | categories | anchor texts in the div labelled `Categories:` |
///
/// Optional fields that are absent become `None` or empty lists. A page with
/// no video locator is a [`ParseError::MissingAsset`].
pub fn extract_sign(
    html: &str,
    entry: &CatalogEntry,
    asset_ext: &str,
) -> Result<SignRecord, ParseError> {
    let document = Html::parse_document(html);

    let locator = meta_content(&document, "meta[property=\"og:video\"]")
        .or_else(|| meta_content(&document, "meta[name=\"twitter:player:stream\"]"))
        .ok_or_else(|| ParseError::MissingAsset {
            name: entry.name.clone(),
        })?;

    let video_url = resolve_locator(&entry.detail_url, &locator).ok_or_else(|| {
        ParseError::InvalidAsset {
            name: entry.name.clone(),
            locator: locator.clone(),
        }
    })?;

    let description = selector("div.featurette-heading-sub")
        .and_then(|sub| document.select(&sub).next().map(|div| normalized_text(&div)))
        .filter(|text| !text.is_empty());

    Ok(SignRecord {
        sign_name: entry.name.clone(),
        partition: entry.partition.clone(),
        page_url: entry.detail_url.clone(),
        video_url,
        destination_key: asset_key(&entry.partition, &entry.name, asset_ext),
        description,
        similar_signs: labelled_links(&document, &SIMILAR_LABELS),
        categories: labelled_links(&document, &CATEGORIES_LABELS),
        scraped_at: Utc::now(),
    })
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let meta = selector(css)?;
    document
        .select(&meta)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn resolve_locator(page_url: &str, locator: &str) -> Option<String> {
    match Url::parse(locator) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(page_url).ok()?;
            base.join(locator).ok().map(|url| url.to_string())
        }
        Err(_) => None,
    }
}

/// Collapses runs of whitespace and trims
fn normalized_text(element: &ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn contains_label(element: &ElementRef<'_>, labels: &[&str]) -> bool {
    let text = normalized_text(element);
    labels.iter().any(|label| text.contains(label))
}

/// Anchor texts inside the innermost div whose text carries one of `labels`
fn labelled_links(document: &Html, labels: &[&str]) -> Vec<String> {
    let (Some(div), Some(anchors)) = (selector("div"), selector("a")) else {
        return Vec::new();
    };

    let section = document.select(&div).find(|candidate| {
        contains_label(candidate, labels)
            && !candidate
                .select(&div)
                .any(|inner| inner.id() != candidate.id() && contains_label(&inner, labels))
    });

    section
        .map(|section| {
            section
                .select(&anchors)
                .map(|a| normalized_text(&a))
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
