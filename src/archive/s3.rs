//! S3-compatible object storage backend

use super::{ArchiveProvider, ProviderOutcome};
use crate::config::S3ProviderConfig;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::time::Duration;

/// Archive objects in an S3 bucket, optionally under a key prefix
#[derive(Clone)]
pub struct S3Provider {
    client: Client,
    bucket: String,
    prefix: String,
    public_base_url: Option<String>,
    url_expiration: Duration,
}

impl S3Provider {
    /// Build a client from configuration
    ///
    /// Static keys are used when both are configured; otherwise the SDK's
    /// default credential chain applies.
    pub async fn new(config: &S3ProviderConfig, url_expiration: Duration) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "edition-dl",
            ));
        }
        let shared_config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket.clone(),
            prefix: normalize_prefix(config.prefix.as_deref().unwrap_or("")),
            public_base_url: config.public_base_url.clone(),
            url_expiration,
        }
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl std::fmt::Debug for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Provider")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ArchiveProvider for S3Provider {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> ProviderOutcome<()> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(bytes))
            .content_type(mime_type)
            .send()
            .await;
        match result {
            Ok(_) => ProviderOutcome::Success(()),
            Err(e) => classify(e),
        }
    }

    async fn list_keys(&self) -> ProviderOutcome<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(e) => return classify(e),
            };
            for object in page.contents() {
                let Some(key) = object.key().and_then(|k| k.strip_prefix(&self.prefix)) else {
                    continue;
                };
                // Nested "directories" under the prefix belong to someone else
                if !key.is_empty() && !key.contains('/') {
                    keys.push(key.to_string());
                }
            }
        }
        ProviderOutcome::Success(keys)
    }

    async fn delete(&self, key: &str) -> ProviderOutcome<()> {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;
        match result {
            Ok(_) => ProviderOutcome::Success(()),
            Err(e) => classify(e),
        }
    }

    async fn public_url(&self, key: &str) -> ProviderOutcome<String> {
        if let Some(base) = &self.public_base_url {
            return ProviderOutcome::Success(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.object_key(key)
            ));
        }

        let presigning = match PresigningConfig::expires_in(self.url_expiration) {
            Ok(presigning) => presigning,
            Err(e) => return ProviderOutcome::Fatal(format!("invalid URL expiration: {e}")),
        };
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .presigned(presigning)
            .await;
        match presigned {
            Ok(request) => ProviderOutcome::Success(request.uri().to_string()),
            Err(e) => classify(e),
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Sort an SDK failure into retry or fatal
///
/// Access and addressing failures will not fix themselves; timeouts, dispatch
/// failures, throttling and 5xx answers might.
fn classify<E, T>(err: SdkError<E>) -> ProviderOutcome<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let reason = DisplayErrorContext(&err).to_string();
    match (&err, status) {
        (SdkError::ConstructionFailure(_), _) => ProviderOutcome::Fatal(reason),
        (_, Some(401 | 403 | 404)) => ProviderOutcome::Fatal(reason),
        _ => ProviderOutcome::Retry(reason),
    }
}
