//! Edition download
//!
//! The direct path streams the edition through the session's HTTP client
//! into a `.part` file in the temp directory and renames it into the
//! download directory only once the stream has completed. When the source
//! answers a PDF link with an HTML wrapper page, or the session was
//! established through the browser, the rendered page is captured instead.
//! A login form served in place of a PDF is handed on unpromoted so the
//! validator can report the expired session.

use crate::config::{Config, RetryConfig, SourceConfig};
use crate::error::FetchError;
use crate::retry::with_retry;
use crate::session::{AuthSession, inspect_page};
use crate::types::{
    AuthPath, ContentFormat, EditionReference, RawContent, parse_storage_key, storage_key,
};
use crate::utils::{
    content_disposition_filename, content_type, format_from_media_type, format_from_path,
    sniff_format,
};
use bytes::Bytes;
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Downloads editions to disk
pub struct Fetcher {
    download_dir: PathBuf,
    temp_dir: PathBuf,
    retry: RetryConfig,
    source: SourceConfig,
}

impl Fetcher {
    /// Create a fetcher from configuration
    pub fn new(config: &Config) -> Self {
        Self {
            download_dir: config.download.download_dir.clone(),
            temp_dir: config.download.temp_dir.clone(),
            retry: config.retry.clone(),
            source: config.source.clone(),
        }
    }

    /// Retrieve the edition bytes for `reference`
    pub async fn fetch(
        &self,
        session: &AuthSession,
        reference: &EditionReference,
    ) -> Result<RawContent, FetchError> {
        self.ensure_dirs().await?;

        if reference.content_format == ContentFormat::Html
            && session.path() == AuthPath::Browser
            && session.browser().is_some()
        {
            return self.capture(session, reference).await;
        }

        let direct = with_retry(&self.retry, "edition download", || {
            self.download(session, reference)
        })
        .await;

        match direct {
            Err(FetchError::UnexpectedContentType { ref content_type, .. })
                if content_type == "text/html" && session.browser().is_some() =>
            {
                tracing::warn!(
                    url = %reference.source_url,
                    "direct download returned an HTML page, capturing rendered page instead"
                );
                self.capture(session, reference).await
            }
            other => other,
        }
    }

    async fn ensure_dirs(&self) -> Result<(), FetchError> {
        for dir in [&self.download_dir, &self.temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error(dir, e))?;
        }
        Ok(())
    }

    async fn download(
        &self,
        session: &AuthSession,
        reference: &EditionReference,
    ) -> Result<RawContent, FetchError> {
        let url = reference.source_url.as_str();
        let resp = session
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared = content_type(&resp);
        let named = content_disposition_filename(&resp)
            .as_deref()
            .and_then(format_from_path);

        let temp_path = self.temp_path(reference);
        let bytes = stream_to_file(url, resp.bytes_stream(), &temp_path).await?;
        if bytes.is_empty() {
            discard(&temp_path).await;
            return Err(FetchError::EmptyPayload {
                url: url.to_string(),
            });
        }

        // Sniffed bytes beat headers; sources mislabel PDFs as octet-stream
        let actual = sniff_format(&bytes)
            .or_else(|| declared.as_deref().and_then(format_from_media_type))
            .or(named);

        let format = match (reference.content_format, actual) {
            (ContentFormat::Pdf, Some(ContentFormat::Pdf)) => ContentFormat::Pdf,
            (ContentFormat::Html, Some(found)) => found,
            (ContentFormat::Pdf, Some(ContentFormat::Html))
                if inspect_page(&String::from_utf8_lossy(&bytes), &self.source).is_login_page() =>
            {
                tracing::warn!(url = %url, "source answered the edition link with its login form");
                let content = RawContent::new(reference.date, ContentFormat::Pdf, bytes)
                    .ok_or_else(|| FetchError::EmptyPayload {
                        url: url.to_string(),
                    })?;
                return Ok(content.with_local_path(temp_path));
            }
            (ContentFormat::Pdf, Some(ContentFormat::Html)) => {
                discard(&temp_path).await;
                return Err(FetchError::UnexpectedContentType {
                    url: url.to_string(),
                    content_type: "text/html".to_string(),
                });
            }
            (_, None) => {
                discard(&temp_path).await;
                return Err(FetchError::UnexpectedContentType {
                    url: url.to_string(),
                    content_type: declared.unwrap_or_else(|| "unknown".to_string()),
                });
            }
        };

        let final_path = self.final_path(reference, format);
        promote(&temp_path, &final_path).await?;

        let content = RawContent::new(reference.date, format, bytes).ok_or_else(|| {
            FetchError::EmptyPayload {
                url: url.to_string(),
            }
        })?;
        tracing::info!(
            date = %reference.date,
            format = %format,
            size_bytes = content.size_bytes(),
            sha256 = %content.sha256,
            path = %final_path.display(),
            "edition downloaded"
        );
        Ok(content.with_local_path(final_path))
    }

    async fn capture(
        &self,
        session: &AuthSession,
        reference: &EditionReference,
    ) -> Result<RawContent, FetchError> {
        let url = reference.source_url.as_str();
        let Some(browser) = session.browser() else {
            return Err(FetchError::UnexpectedContentType {
                url: url.to_string(),
                content_type: "text/html".to_string(),
            });
        };
        let cookies = url::Url::parse(url)
            .map(|parsed| session.browser_cookies(&parsed))
            .unwrap_or_default();

        let html = with_retry(&self.retry, "page capture", || {
            browser.capture(url, &cookies)
        })
        .await?;

        let temp_path = self.temp_path(reference);
        let chunks = futures::stream::iter([Ok::<_, FetchError>(Bytes::from(html))]);
        let bytes = stream_to_file(url, chunks, &temp_path).await?;
        if bytes.is_empty() {
            discard(&temp_path).await;
            return Err(FetchError::EmptyPayload {
                url: url.to_string(),
            });
        }

        let final_path = self.final_path(reference, ContentFormat::Html);
        promote(&temp_path, &final_path).await?;

        let content = RawContent::new(reference.date, ContentFormat::Html, bytes).ok_or_else(
            || FetchError::EmptyPayload {
                url: url.to_string(),
            },
        )?;
        tracing::info!(
            date = %reference.date,
            browser = browser.name(),
            size_bytes = content.size_bytes(),
            "rendered page captured"
        );
        Ok(content.with_local_path(final_path))
    }

    fn temp_path(&self, reference: &EditionReference) -> PathBuf {
        self.temp_dir
            .join(format!("{}.part", crate::types::format_date(reference.date)))
    }

    fn final_path(&self, reference: &EditionReference, format: ContentFormat) -> PathBuf {
        self.download_dir.join(storage_key(reference.date, format))
    }

    /// Remove local editions dated before `cutoff`, returning how many went
    ///
    /// Only files named like archive keys are touched. Failures are logged
    /// and skipped.
    pub async fn prune_downloads(&self, cutoff: NaiveDate) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.download_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = %self.download_dir.display(), error = %e, "could not list download directory");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %self.download_dir.display(), error = %e, "download directory listing interrupted");
                    break;
                }
            };
            let name = entry.file_name();
            let Some((date, _)) = name.to_str().and_then(parse_storage_key) else {
                continue;
            };
            if date >= cutoff {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "expired local edition removed");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove expired local edition");
                }
            }
        }

        if removed > 0 {
            tracing::info!(cutoff = %cutoff, removed, "local downloads pruned");
        }
        removed
    }
}

/// Write a byte stream to `temp_path`, returning everything written
///
/// On any stream or write failure the temp file is removed before the
/// error is returned, so nothing partial outlives the call.
pub async fn stream_to_file<S, E>(
    url: &str,
    stream: S,
    temp_path: &Path,
) -> Result<Bytes, FetchError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| io_error(temp_path, e))?;
    let mut body = Vec::new();

    let result = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::NetworkFailure {
                url: url.to_string(),
                reason: format!("stream interrupted after {} bytes: {e}", body.len()),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(temp_path, e))?;
            body.extend_from_slice(&chunk);
        }
        file.flush().await.map_err(|e| io_error(temp_path, e))?;
        file.sync_all().await.map_err(|e| io_error(temp_path, e))?;
        Ok::<(), FetchError>(())
    }
    .await;

    drop(file);
    if let Err(e) = result {
        discard(temp_path).await;
        return Err(e);
    }
    Ok(Bytes::from(body))
}

/// Move a completed temp file to its permanent path
pub async fn promote(temp_path: &Path, final_path: &Path) -> Result<(), FetchError> {
    if let Err(e) = tokio::fs::rename(temp_path, final_path).await {
        discard(temp_path).await;
        return Err(io_error(final_path, e));
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial download");
    }
}

fn network_error(url: &str, e: reqwest::Error) -> FetchError {
    FetchError::NetworkFailure {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
