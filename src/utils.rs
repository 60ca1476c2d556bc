//! Utility functions for content types, URLs and retention dates

use crate::types::ContentFormat;
use chrono::{Days, NaiveDate};

/// Bytes inspected when sniffing a payload's format
const SNIFF_LEN: usize = 1024;

/// Media type of a response without parameters, lowercased
///
/// `text/html; charset=utf-8` becomes `text/html`.
pub fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type)
}

/// Strip parameters from a Content-Type value and lowercase it
pub fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Map a media type to a content format
pub fn format_from_media_type(media_type: &str) -> Option<ContentFormat> {
    match media_type {
        "application/pdf" | "application/x-pdf" => Some(ContentFormat::Pdf),
        "text/html" | "application/xhtml+xml" => Some(ContentFormat::Html),
        _ => None,
    }
}

/// Extract the filename from a response's Content-Disposition header
///
/// Handles both `filename="x.pdf"` and RFC 5987 `filename*=UTF-8''x.pdf`.
pub fn content_disposition_filename(response: &reqwest::Response) -> Option<String> {
    let value = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded) {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            return Some(name.trim_matches('"').to_string());
        }
    }
    None
}

/// Guess a format from a URL path or filename extension
pub fn format_from_path(path: &str) -> Option<ContentFormat> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    ContentFormat::from_extension(ext)
}

/// Sniff a payload's format from its leading bytes
pub fn sniff_format(bytes: &[u8]) -> Option<ContentFormat> {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    if find_subslice(head, b"%PDF-").is_some() {
        return Some(ContentFormat::Pdf);
    }
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<!doctype html") || text.starts_with("<html") || text.contains("<html")
    {
        return Some(ContentFormat::Html);
    }
    None
}

/// Position of `needle` within `haystack`
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// First date inside a retention window of `window_days` ending at `today`
///
/// Entries dated strictly before the returned date fall outside the window.
pub fn retention_cutoff(today: NaiveDate, window_days: u32) -> NaiveDate {
    let span = u64::from(window_days.saturating_sub(1));
    today.checked_sub_days(Days::new(span)).unwrap_or(NaiveDate::MIN)
}

/// Resolve a possibly relative href against a page URL
pub fn resolve_href(base: &url::Url, href: &str) -> Option<url::Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    base.join(href).ok()
}
