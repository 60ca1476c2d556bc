//! Page inspection for session confirmation and login-page detection

use crate::config::SourceConfig;
use crate::types::AuthEvidence;
use scraper::{Html, Selector};
use std::collections::BTreeMap;

/// What a rendered page says about the session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageIndicators {
    /// A logout link or account element is present
    pub logout_indicator: bool,
    /// The configured username appears in the page text
    pub username_shown: bool,
    /// A password input is present
    pub password_field: bool,
}

impl PageIndicators {
    /// Session evidence offered by this page
    ///
    /// A username echoed on a page that still asks for a password is an
    /// error message, not a welcome, and does not count.
    pub fn evidence(&self) -> Vec<AuthEvidence> {
        let mut evidence = Vec::new();
        if self.logout_indicator {
            evidence.push(AuthEvidence::LogoutIndicator);
        }
        if self.username_shown && !self.password_field {
            evidence.push(AuthEvidence::WelcomeUsername);
        }
        evidence
    }

    /// Whether the page is a login form rather than authenticated content
    pub fn is_login_page(&self) -> bool {
        self.password_field && !self.logout_indicator
    }
}

/// Inspect a document for session indicators
pub fn inspect_page(html: &str, source: &SourceConfig) -> PageIndicators {
    let doc = Html::parse_document(html);
    inspect_document(&doc, source)
}

/// Inspect an already-parsed document for session indicators
pub fn inspect_document(doc: &Html, source: &SourceConfig) -> PageIndicators {
    let matches = |selector: &str| {
        Selector::parse(selector)
            .map(|s| doc.select(&s).next().is_some())
            .unwrap_or(false)
    };

    let logout_indicator = matches(&source.logout_selector);
    let password_field = matches(&source.password_selector) || matches("input[type=password]");

    let username = source.username.trim().to_lowercase();
    let username_shown = !username.is_empty()
        && Selector::parse("body")
            .ok()
            .and_then(|body| doc.select(&body).next())
            .map(|body| {
                body.text()
                    .collect::<String>()
                    .to_lowercase()
                    .contains(&username)
            })
            .unwrap_or(false);

    PageIndicators {
        logout_indicator,
        username_shown,
        password_field,
    }
}

/// Cookie name/value pairs the jar would send to a URL
pub fn cookie_snapshot(jar: &reqwest::cookie::Jar, url: &url::Url) -> BTreeMap<String, String> {
    use reqwest::cookie::CookieStore;

    jar.cookies(url)
        .and_then(|header| header.to_str().map(parse_cookie_header).ok())
        .unwrap_or_default()
}

/// Parse a `Cookie:` header value
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Whether the login exchange produced a non-empty cookie that was absent
/// or different before it
pub fn has_fresh_session_cookie(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> bool {
    after
        .iter()
        .any(|(name, value)| !value.is_empty() && before.get(name) != Some(value))
}
