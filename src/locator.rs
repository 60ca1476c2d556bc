//! Edition location
//!
//! Links on the landing (or listing) page are normalized into
//! [`LinkCandidate`]s and run through an ordered list of pure matchers.
//! The first tier with a matching candidate wins:
//!
//! 1. the per-deployment override selector
//! 2. a link whose href or label embeds the target date in a known format
//! 3. a link labelled with a freshness keyword (`latest`, `current`, `today`)

use crate::config::{Config, RetryConfig, SourceConfig};
use crate::error::LocatorError;
use crate::retry::with_retry;
use crate::session::AuthSession;
use crate::types::{ContentFormat, EditionReference, SelectorUsed, format_date};
use crate::utils::{format_from_media_type, format_from_path, media_type, resolve_href};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Elements that can point at an edition, with the attribute holding the target
const LINK_ELEMENTS: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("iframe[src]", "src"),
    ("embed[src]", "src"),
    ("object[data]", "data"),
];

/// A normalized link or embedded resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkCandidate {
    /// Absolute target URL
    pub href: url::Url,
    /// Visible text, or title/aria-label/alt when the element has none
    pub label: String,
    /// Media type advertised by the element's `type` attribute
    pub mime_hint: Option<String>,
    /// Whether the override selector selected this element
    pub matched_override: bool,
}

impl LinkCandidate {
    /// Content format implied by the MIME hint or the URL extension
    pub fn content_format(&self) -> ContentFormat {
        self.mime_hint
            .as_deref()
            .and_then(format_from_media_type)
            .or_else(|| format_from_path(self.href.path()))
            .unwrap_or(ContentFormat::Html)
    }

    fn decoded_href(&self) -> String {
        urlencoding::decode(self.href.as_str())
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.href.to_string())
    }
}

/// Patterns derived from the target date and source settings
pub struct MatchContext {
    date_patterns: Vec<Regex>,
    keyword_patterns: Vec<Regex>,
}

impl MatchContext {
    /// Build date and keyword patterns for `target`
    pub fn new(target: NaiveDate, source: &SourceConfig) -> Self {
        let mut rendered: Vec<String> = source
            .date_formats
            .iter()
            .filter_map(|fmt| render_date(target, fmt))
            .map(|s| s.to_lowercase())
            .collect();
        rendered.sort();
        rendered.dedup();

        // Digits may not continue on either side, so 1 March never matches 11 March
        let date_patterns = rendered
            .iter()
            .filter_map(|s| Regex::new(&format!(r"(?:^|[^0-9]){}(?:$|[^0-9])", regex::escape(s))).ok())
            .collect();
        let keyword_patterns = source
            .freshness_keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .filter_map(|k| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k.trim()))).ok())
            .collect();

        Self {
            date_patterns,
            keyword_patterns,
        }
    }
}

fn render_date(date: NaiveDate, fmt: &str) -> Option<String> {
    use std::fmt::Write;

    // chrono reports unsupported specifiers through fmt::Error
    let mut out = String::new();
    write!(out, "{}", date.format(fmt)).ok()?;
    (!out.is_empty()).then_some(out)
}

type Matcher = fn(&LinkCandidate, &MatchContext) -> bool;

/// Locator tiers in priority order
const TIERS: &[(SelectorUsed, Matcher)] = &[
    (SelectorUsed::Override, matches_override),
    (SelectorUsed::DateMatch, matches_date),
    (SelectorUsed::FreshnessKeyword, matches_keyword),
];

fn matches_override(candidate: &LinkCandidate, _ctx: &MatchContext) -> bool {
    candidate.matched_override
}

fn matches_date(candidate: &LinkCandidate, ctx: &MatchContext) -> bool {
    let href = candidate.decoded_href().to_lowercase();
    let label = candidate.label.to_lowercase();
    ctx.date_patterns
        .iter()
        .any(|p| p.is_match(&href) || p.is_match(&label))
}

fn matches_keyword(candidate: &LinkCandidate, ctx: &MatchContext) -> bool {
    ctx.keyword_patterns.iter().any(|p| p.is_match(&candidate.label))
}

/// First candidate of the highest-priority tier that matches
pub fn select_candidate<'a>(
    candidates: &'a [LinkCandidate],
    ctx: &MatchContext,
) -> Option<(&'a LinkCandidate, SelectorUsed)> {
    TIERS.iter().find_map(|(tier, matcher)| {
        candidates
            .iter()
            .find(|c| matcher(c, ctx))
            .map(|c| (c, *tier))
    })
}

/// Normalize the links and embedded resources of a page
pub fn extract_candidates(
    html: &str,
    page_url: &url::Url,
    override_selector: Option<&str>,
) -> Vec<LinkCandidate> {
    let doc = Html::parse_document(html);
    let base = base_url(&doc, page_url);
    let mut candidates = Vec::new();

    if let Some(selector) = override_selector.and_then(|s| Selector::parse(s).ok()) {
        for element in doc.select(&selector) {
            let target = ["href", "src", "data"]
                .iter()
                .find_map(|attr| element.value().attr(attr));
            if let Some(candidate) = target.and_then(|t| candidate(element, t, &base, true)) {
                candidates.push(candidate);
            }
        }
    }

    for (css, attr) in LINK_ELEMENTS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in doc.select(&selector) {
            if let Some(candidate) = element
                .value()
                .attr(attr)
                .and_then(|t| candidate(element, t, &base, false))
            {
                candidates.push(candidate);
            }
        }
    }

    candidates
}

fn base_url(doc: &Html, page_url: &url::Url) -> url::Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|s| doc.select(&s).next())
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone())
}

fn candidate(
    element: ElementRef<'_>,
    target: &str,
    base: &url::Url,
    matched_override: bool,
) -> Option<LinkCandidate> {
    let href = resolve_href(base, target)?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let mut label = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() {
        label = ["title", "aria-label"]
            .iter()
            .find_map(|attr| element.value().attr(attr))
            .or_else(|| {
                Selector::parse("img[alt]")
                    .ok()
                    .and_then(|s| element.select(&s).next())
                    .and_then(|img| img.value().attr("alt"))
            })
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    let mime_hint = element.value().attr("type").map(media_type);

    Some(LinkCandidate {
        href,
        label,
        mime_hint,
        matched_override,
    })
}

/// Resolve the edition link for `target` on a page
pub fn locate_in_page(
    html: &str,
    page_url: &url::Url,
    target: NaiveDate,
    source: &SourceConfig,
) -> Result<EditionReference, LocatorError> {
    let candidates = extract_candidates(html, page_url, source.edition_link_selector.as_deref());
    let ctx = MatchContext::new(target, source);
    tracing::debug!(
        page = %page_url,
        candidates = candidates.len(),
        "evaluating edition link candidates"
    );

    let (found, selector_used) =
        select_candidate(&candidates, &ctx).ok_or_else(|| LocatorError::LinkNotFound {
            page: page_url.to_string(),
            target_date: format_date(target),
        })?;

    Ok(EditionReference {
        date: target,
        source_url: found.href.to_string(),
        content_format: found.content_format(),
        selector_used,
    })
}

/// Finds the edition link on the authenticated landing or listing page
pub struct Locator {
    source: SourceConfig,
    retry: RetryConfig,
}

impl Locator {
    /// Create a locator from configuration
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.source.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Resolve the edition for `target`
    ///
    /// Uses the page the session landed on, re-fetching the configured
    /// listing page when the session ended up elsewhere.
    pub async fn locate(
        &self,
        session: &AuthSession,
        target: NaiveDate,
    ) -> Result<EditionReference, LocatorError> {
        let listing = self
            .source
            .listing_url
            .as_deref()
            .filter(|listing| *listing != session.landing_url().as_str());

        let reference = match listing {
            Some(listing) => {
                let (page_url, html) =
                    with_retry(&self.retry, "listing page", || fetch_page(session, listing))
                        .await?;
                locate_in_page(&html, &page_url, target, &self.source)?
            }
            None => locate_in_page(
                session.landing_html(),
                session.landing_url(),
                target,
                &self.source,
            )?,
        };

        tracing::info!(
            date = %reference.date,
            url = %reference.source_url,
            format = %reference.content_format,
            selector = ?reference.selector_used,
            "edition located"
        );
        Ok(reference)
    }
}

async fn fetch_page(
    session: &AuthSession,
    raw_url: &str,
) -> Result<(url::Url, String), LocatorError> {
    let unavailable = |reason: String, retryable: bool| LocatorError::PageUnavailable {
        url: raw_url.to_string(),
        reason,
        retryable,
    };

    let resp = session
        .client()
        .get(raw_url)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string(), true))?;
    let status = resp.status();
    if !status.is_success() {
        let retryable = status.is_server_error() || status.as_u16() == 429;
        return Err(unavailable(format!("HTTP {status}"), retryable));
    }
    let url = resp.url().clone();
    let html = resp
        .text()
        .await
        .map_err(|e| unavailable(e.to_string(), true))?;
    Ok((url, html))
}
