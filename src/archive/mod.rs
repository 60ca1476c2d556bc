//! Rolling edition archive
//!
//! Editions are stored under `{date}.{ext}` keys behind a provider
//! abstraction with a primary and an optional secondary backend. Writes go
//! to the primary with backoff and fail over to the secondary when the
//! primary stays unavailable. The store also lists the retention window and
//! purges everything older than it.

mod local;
mod memory;
mod s3;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use local::LocalProvider;
pub use memory::{MemoryProvider, ScriptedFailure, StoredObject};
pub use s3::S3Provider;

use crate::config::{ProviderConfig, RetryConfig, StorageConfig};
use crate::error::StoreError;
use crate::retry::with_retry;
use crate::types::{
    ArchiveEntry, ContentFormat, ProviderRole, PurgeFailure, PurgeReport, RawContent,
    parse_storage_key, storage_key,
};
use crate::utils::retention_cutoff;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a single provider call
///
/// Providers classify their own failures; the store decides what to do with
/// them based on which backend reported them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderOutcome<T> {
    /// The call succeeded
    Success(T),
    /// Transient failure, worth retrying or failing over
    Retry(String),
    /// Permanent failure (access denied, misconfiguration)
    Fatal(String),
}

impl<T> ProviderOutcome<T> {
    /// Convert into a store result, attributing failures to `provider`
    pub fn into_result(self, provider: ProviderRole) -> Result<T, StoreError> {
        match self {
            ProviderOutcome::Success(value) => Ok(value),
            ProviderOutcome::Retry(reason) => {
                Err(StoreError::ProviderUnavailable { provider, reason })
            }
            ProviderOutcome::Fatal(reason) => Err(StoreError::PermissionDenied { provider, reason }),
        }
    }
}

/// A storage backend holding archive objects under a single namespace
#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Write `bytes` under `key`, replacing any existing object
    async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> ProviderOutcome<()>;

    /// All keys currently held
    async fn list_keys(&self) -> ProviderOutcome<Vec<String>>;

    /// Remove `key`; removing a missing key succeeds
    async fn delete(&self, key: &str) -> ProviderOutcome<()>;

    /// Externally addressable URL for `key`
    async fn public_url(&self, key: &str) -> ProviderOutcome<String>;
}

/// Build a provider from its configuration
pub async fn provider_from_config(
    config: &ProviderConfig,
    storage: &StorageConfig,
) -> Result<Arc<dyn ArchiveProvider>, StoreError> {
    match config {
        ProviderConfig::Local(local) => Ok(Arc::new(LocalProvider::new(local))),
        ProviderConfig::S3(s3) => Ok(Arc::new(S3Provider::new(s3, storage.url_expiration).await)),
    }
}

/// Archive of recent editions across a primary and optional secondary backend
pub struct ArchiveStore {
    primary: Arc<dyn ArchiveProvider>,
    secondary: Option<Arc<dyn ArchiveProvider>>,
    retry: RetryConfig,
    dry_run: bool,
}

impl ArchiveStore {
    /// Create a store over explicit providers
    pub fn new(
        primary: Arc<dyn ArchiveProvider>,
        secondary: Option<Arc<dyn ArchiveProvider>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            retry,
            dry_run: false,
        }
    }

    /// Create a store from storage configuration
    pub async fn from_config(
        storage: &StorageConfig,
        retry: RetryConfig,
    ) -> Result<Self, StoreError> {
        let primary = provider_from_config(&storage.primary, storage).await?;
        let secondary = match &storage.secondary {
            Some(config) => Some(provider_from_config(config, storage).await?),
            None => None,
        };
        Ok(Self::new(primary, secondary, retry))
    }

    /// Skip writes and deletions, logging what would have happened
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Persist a validated edition
    ///
    /// The primary is retried with backoff; if it stays unavailable the
    /// secondary receives the same payload. An access failure on the primary
    /// is surfaced immediately.
    pub async fn store(
        &self,
        date: NaiveDate,
        content: &RawContent,
    ) -> Result<ArchiveEntry, StoreError> {
        let key = storage_key(date, content.format);

        if self.dry_run {
            tracing::warn!(
                date = %date,
                key = %key,
                provider = self.primary.name(),
                size_bytes = content.size_bytes(),
                "[dry run] would archive edition"
            );
            return self
                .entry(ProviderRole::Primary, date, key, content)
                .await;
        }

        let primary_err = match self
            .put_with_retry(ProviderRole::Primary, &key, content)
            .await
        {
            Ok(()) => {
                return self
                    .finish_store(ProviderRole::Primary, date, key, content)
                    .await;
            }
            Err(e @ StoreError::PermissionDenied { .. }) => return Err(e),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };
        tracing::warn!(
            date = %date,
            key = %key,
            primary = self.primary.name(),
            secondary = secondary.name(),
            error = %primary_err,
            "primary storage unavailable, failing over to secondary"
        );
        self.put_with_retry(ProviderRole::Secondary, &key, content)
            .await?;
        self.finish_store(ProviderRole::Secondary, date, key, content)
            .await
    }

    /// Entries within the `window_days` ending at `today`, newest first
    ///
    /// One entry per date; the primary's copy wins when both backends hold one.
    pub async fn list(
        &self,
        window_days: u32,
        today: NaiveDate,
    ) -> Result<Vec<ArchiveEntry>, StoreError> {
        let cutoff = retention_cutoff(today, window_days);
        let mut by_date: BTreeMap<NaiveDate, (ProviderRole, String, ContentFormat)> =
            BTreeMap::new();
        let mut listed_any = false;
        let mut first_err = None;

        for (role, provider) in self.providers() {
            let keys = match self.list_keys(role, provider.as_ref()).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "archive listing failed");
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            listed_any = true;
            for key in keys {
                let Some((date, format)) = parse_storage_key(&key) else {
                    continue;
                };
                if date < cutoff || date > today {
                    continue;
                }
                match by_date.get(&date) {
                    // Earlier provider wins; within a provider PDF beats HTML
                    Some((held_role, _, held_format))
                        if *held_role != role
                            || *held_format == ContentFormat::Pdf
                            || format != ContentFormat::Pdf => {}
                    _ => {
                        by_date.insert(date, (role, key, format));
                    }
                }
            }
        }

        if !listed_any && let Some(e) = first_err {
            return Err(e);
        }

        let mut entries = Vec::with_capacity(by_date.len());
        for (date, (role, key, format)) in by_date.into_iter().rev() {
            let public_url = match self.provider(role).public_url(&key).await.into_result(role) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping entry without a public URL");
                    continue;
                }
            };
            entries.push(ArchiveEntry {
                date,
                storage_key: key,
                mime_type: format.mime_type().to_string(),
                public_url,
                provider: role,
                sha256: None,
            });
        }
        Ok(entries)
    }

    /// The archived entry for `date`, if any backend holds one
    pub async fn find(&self, date: NaiveDate) -> Result<Option<ArchiveEntry>, StoreError> {
        Ok(self
            .list(1, date)
            .await?
            .into_iter()
            .find(|entry| entry.date == date))
    }

    /// Remove every entry dated strictly before `cutoff` from every backend
    ///
    /// Individual deletion failures are collected in the report rather than
    /// aborting the batch. A backend whose listing fails contributes a `*`
    /// failure record. Only when no backend can be listed at all is the
    /// purge itself an error.
    pub async fn purge_older_than(&self, cutoff: NaiveDate) -> Result<PurgeReport, StoreError> {
        let mut report = PurgeReport {
            cutoff,
            removed: 0,
            failed: Vec::new(),
        };
        let mut listed_any = false;
        let mut first_err = None;

        for (role, provider) in self.providers() {
            let keys = match self.list_keys(role, provider.as_ref()).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "archive listing failed during purge");
                    report.failed.push(PurgeFailure {
                        storage_key: "*".to_string(),
                        provider: role,
                        reason: e.to_string(),
                    });
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            listed_any = true;

            let expired = keys.into_iter().filter(|key| {
                parse_storage_key(key).is_some_and(|(date, _)| date < cutoff)
            });
            for key in expired {
                if self.dry_run {
                    tracing::warn!(provider = provider.name(), key = %key, "[dry run] would delete expired edition");
                    continue;
                }
                let deleted = with_retry(&self.retry, "archive delete", || async {
                    provider.delete(&key).await.into_result(role)
                })
                .await;
                match deleted {
                    Ok(()) => {
                        tracing::info!(provider = provider.name(), key = %key, "expired edition deleted");
                        report.removed += 1;
                    }
                    Err(e) => {
                        tracing::error!(provider = provider.name(), key = %key, error = %e, "failed to delete expired edition");
                        report.failed.push(PurgeFailure {
                            storage_key: key,
                            provider: role,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if !listed_any && let Some(e) = first_err {
            return Err(e);
        }

        tracing::info!(
            cutoff = %cutoff,
            removed = report.removed,
            failed = report.failed.len(),
            "retention purge finished"
        );
        Ok(report)
    }

    /// Fresh externally addressable URL for an entry
    pub async fn public_url(&self, entry: &ArchiveEntry) -> Result<String, StoreError> {
        self.provider(entry.provider)
            .public_url(&entry.storage_key)
            .await
            .into_result(entry.provider)
    }

    fn providers(&self) -> Vec<(ProviderRole, &Arc<dyn ArchiveProvider>)> {
        let mut providers = vec![(ProviderRole::Primary, &self.primary)];
        if let Some(secondary) = &self.secondary {
            providers.push((ProviderRole::Secondary, secondary));
        }
        providers
    }

    fn provider(&self, role: ProviderRole) -> &Arc<dyn ArchiveProvider> {
        match (role, &self.secondary) {
            (ProviderRole::Secondary, Some(secondary)) => secondary,
            _ => &self.primary,
        }
    }

    async fn list_keys(
        &self,
        role: ProviderRole,
        provider: &dyn ArchiveProvider,
    ) -> Result<Vec<String>, StoreError> {
        with_retry(&self.retry, "archive list", || async {
            provider.list_keys().await.into_result(role)
        })
        .await
    }

    async fn put_with_retry(
        &self,
        role: ProviderRole,
        key: &str,
        content: &RawContent,
    ) -> Result<(), StoreError> {
        let provider = self.provider(role);
        let mime_type = content.format.mime_type();
        with_retry(&self.retry, "archive put", || async {
            provider
                .put(key, content.bytes.clone(), mime_type)
                .await
                .into_result(role)
        })
        .await
    }

    async fn finish_store(
        &self,
        role: ProviderRole,
        date: NaiveDate,
        key: String,
        content: &RawContent,
    ) -> Result<ArchiveEntry, StoreError> {
        // A date keeps one object per backend even if its format changed
        let other_format = match content.format {
            ContentFormat::Pdf => ContentFormat::Html,
            ContentFormat::Html => ContentFormat::Pdf,
        };
        let stale = storage_key(date, other_format);
        if let Err(e) = self.provider(role).delete(&stale).await.into_result(role) {
            tracing::warn!(key = %stale, error = %e, "failed to remove edition stored in previous format");
        }

        let entry = self.entry(role, date, key, content).await?;
        tracing::info!(
            date = %date,
            key = %entry.storage_key,
            provider = self.provider(role).name(),
            role = %role,
            sha256 = %content.sha256,
            "edition archived"
        );
        Ok(entry)
    }

    async fn entry(
        &self,
        role: ProviderRole,
        date: NaiveDate,
        key: String,
        content: &RawContent,
    ) -> Result<ArchiveEntry, StoreError> {
        let public_url = self
            .provider(role)
            .public_url(&key)
            .await
            .into_result(role)?;
        tracing::debug!(key = %key, url = %public_url, "public URL issued");
        Ok(ArchiveEntry {
            date,
            storage_key: key,
            mime_type: content.format.mime_type().to_string(),
            public_url,
            provider: role,
            sha256: Some(content.sha256.clone()),
        })
    }
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.as_ref().map(|s| s.name()))
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
