//! Content validation
//!
//! Nothing reaches the archive without passing here. PDFs are checked for
//! their header and trailer markers and at least one page object; HTML is
//! checked for a closed root element and a front-page content marker. A
//! payload that turns out to be the source's login form is reported as
//! [`ValidationError::LoginPageDetected`] so the orchestrator can
//! re-authenticate instead of failing outright.

use crate::config::{Config, SourceConfig};
use crate::error::ValidationError;
use crate::session::inspect_document;
use crate::types::{ContentFormat, EditionReference, RawContent};
use crate::utils::{find_subslice, sniff_format};
use regex::bytes::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// How far from the end of a PDF the `%%EOF` marker may sit
///
/// Writers commonly append a newline or a few padding bytes after it.
const TRAILER_WINDOW: usize = 2048;

/// Smallest payload that can hold a PDF header, one object and a trailer
const MIN_PDF_LEN: usize = 32;

/// Checks fetched payloads before archiving
#[derive(Clone, Debug)]
pub struct Validator {
    source: SourceConfig,
}

impl Validator {
    /// Create a validator from configuration
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.source.clone(),
        }
    }

    /// Accept `content` as the edition described by `reference`
    pub fn validate(
        &self,
        content: RawContent,
        reference: &EditionReference,
    ) -> Result<RawContent, ValidationError> {
        if content.bytes.is_empty() {
            return Err(corrupt("payload is empty"));
        }
        if content.date != reference.date {
            return Err(corrupt(format!(
                "payload dated {} does not match requested edition {}",
                content.date, reference.date
            )));
        }

        match content.format {
            ContentFormat::Pdf => self.check_pdf(&content.bytes)?,
            ContentFormat::Html => self.check_html(&content.bytes)?,
        }

        tracing::debug!(
            date = %content.date,
            format = %content.format,
            size_bytes = content.size_bytes(),
            "edition content validated"
        );
        Ok(content)
    }

    fn check_pdf(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        if !bytes.starts_with(b"%PDF-") {
            // Paywalls answer asset URLs with their login page
            if sniff_format(bytes) == Some(ContentFormat::Html) {
                let doc = Html::parse_document(&String::from_utf8_lossy(bytes));
                if inspect_document(&doc, &self.source).is_login_page() {
                    return Err(ValidationError::LoginPageDetected);
                }
                return Err(corrupt("expected a PDF but received an HTML document"));
            }
            return Err(corrupt("missing %PDF- header"));
        }
        if bytes.len() < MIN_PDF_LEN {
            return Err(corrupt(format!("PDF is only {} bytes", bytes.len())));
        }

        let tail = &bytes[bytes.len().saturating_sub(TRAILER_WINDOW)..];
        if find_subslice(tail, b"%%EOF").is_none() {
            return Err(corrupt("missing %%EOF trailer, document is truncated"));
        }

        let pages = pdf_page_count(bytes);
        if pages == 0 {
            return Err(corrupt("PDF contains no pages"));
        }
        tracing::debug!(pages, "PDF structure looks complete");
        Ok(())
    }

    fn check_html(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        let text = String::from_utf8_lossy(bytes);
        let doc = Html::parse_document(&text);

        if inspect_document(&doc, &self.source).is_login_page() {
            return Err(ValidationError::LoginPageDetected);
        }

        let lowered = text.to_ascii_lowercase();
        let opened = lowered.contains("<html");
        let closed = lowered.trim_end().ends_with("</html>")
            || lowered
                .rfind("</html>")
                .is_some_and(|pos| lowered[pos + "</html>".len()..].trim().is_empty());
        if opened && !closed {
            return Err(corrupt("HTML document is truncated (no closing </html>)"));
        }
        if let Some(body) = lowered.rfind("<body")
            && !lowered[body..].contains("</body>")
        {
            return Err(corrupt("HTML document is truncated (no closing </body>)"));
        }
        if !opened && !lowered.contains("<body") {
            return Err(corrupt("payload is not an HTML document"));
        }

        let has_marker = self
            .source
            .content_markers
            .iter()
            .filter_map(|marker| Selector::parse(marker).ok())
            .any(|selector| {
                doc.select(&selector)
                    .any(|el| !el.text().collect::<String>().trim().is_empty())
            });
        if !has_marker {
            return Err(corrupt("no front-page content marker found"));
        }
        Ok(())
    }
}

/// Count page objects in a PDF
///
/// Prefers the largest `/Count` of a `/Type /Pages` node and falls back to
/// counting `/Type /Page` leaves. Compressed object streams can hide both,
/// so the larger of the two is used.
pub fn pdf_page_count(bytes: &[u8]) -> usize {
    static LEAF: OnceLock<Option<Regex>> = OnceLock::new();
    static COUNT: OnceLock<Option<Regex>> = OnceLock::new();

    let leaves = LEAF
        .get_or_init(|| Regex::new(r"/Type\s*/Page(?:[^s]|$)").ok())
        .as_ref()
        .map(|re| re.find_iter(bytes).count())
        .unwrap_or(0);
    let declared = COUNT
        .get_or_init(|| Regex::new(r"/Count\s+(\d+)").ok())
        .as_ref()
        .and_then(|re| {
            re.captures_iter(bytes)
                .filter_map(|c| c.get(1))
                .filter_map(|m| std::str::from_utf8(m.as_bytes()).ok())
                .filter_map(|n| n.parse::<usize>().ok())
                .max()
        })
        .unwrap_or(0);

    leaves.max(declared)
}

fn corrupt(reason: impl Into<String>) -> ValidationError {
    ValidationError::CorruptContent {
        reason: reason.into(),
    }
}
