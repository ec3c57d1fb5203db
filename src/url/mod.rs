//! URL handling module for Sign-Harvester
//!
//! Builds the listing and detail locators of the dictionary site and maps
//! links found on listing pages back to sign names and page numbers.

use url::Url;

const DICTIONARY_PREFIX: &str = "/dictionary/";
const SIGN_PREFIX: &str = "/sign/";

/// Returns the locator of a listing page for one partition
///
/// Page 1 lives at `/dictionary/<letter>`, later pages at
/// `/dictionary/<letter>/<page>`.
pub fn listing_url(base: &Url, letter: &str, page: u32) -> Result<Url, url::ParseError> {
    if page <= 1 {
        base.join(&format!("{}{}", DICTIONARY_PREFIX, letter))
    } else {
        base.join(&format!("{}{}/{}", DICTIONARY_PREFIX, letter, page))
    }
}

/// Returns the detail-page locator of a sign
pub fn detail_url(base: &Url, name: &str) -> Result<Url, url::ParseError> {
    base.join(&format!("{}{}", SIGN_PREFIX, name))
}

/// Extracts the sign name from a link if it points at a detail page
///
/// Relative and absolute links are both accepted as long as they resolve onto
/// the same host as `base`.
///
/// # Examples
///
/// ```
/// use sign_harvester::url::sign_name_from_href;
/// use url::Url;
///
/// let base = Url::parse("https://www.signasl.org/dictionary/a").unwrap();
/// assert_eq!(sign_name_from_href(&base, "/sign/apple"), Some("apple".to_string()));
/// assert_eq!(sign_name_from_href(&base, "/dictionary/b"), None);
/// ```
pub fn sign_name_from_href(base: &Url, href: &str) -> Option<String> {
    let resolved = base.join(href.trim()).ok()?;
    if resolved.host_str() != base.host_str() {
        return None;
    }

    let name = resolved.path().strip_prefix(SIGN_PREFIX)?.trim_matches('/');
    if name.is_empty() || name.contains('/') {
        return None;
    }

    Some(name.to_string())
}

/// Extracts a page number from a pagination link of the given partition
pub fn page_number_from_href(base: &Url, href: &str, letter: &str) -> Option<u32> {
    let resolved = base.join(href.trim()).ok()?;
    let rest = resolved
        .path()
        .strip_prefix(DICTIONARY_PREFIX)?
        .strip_prefix(letter)?
        .strip_prefix('/')?;

    rest.trim_end_matches('/').parse().ok()
}

/// Makes a sign name safe to use as one segment of a storage key or file name
///
/// Anything other than ASCII alphanumerics, `-`, `_` and `.` becomes `_`, and
/// a leading dot is replaced so the segment can never be `.` or `..`.
pub fn key_segment(name: &str) -> String {
    let mut segment: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if segment.starts_with('.') {
        segment.replace_range(0..1, "_");
    }

    segment
}
