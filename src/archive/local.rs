//! Local directory backend

use super::{ArchiveProvider, ProviderOutcome};
use crate::config::LocalProviderConfig;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Archive objects stored as files in one directory
#[derive(Clone, Debug)]
pub struct LocalProvider {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalProvider {
    /// Create a provider rooted at the configured directory
    pub fn new(config: &LocalProviderConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    /// Directory holding the archive
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Option<PathBuf> {
        // Keys are flat names; anything path-like would escape the root
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return None;
        }
        Some(self.root.join(key))
    }
}

#[async_trait]
impl ArchiveProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, bytes: Bytes, _mime_type: &str) -> ProviderOutcome<()> {
        let Some(path) = self.object_path(key) else {
            return ProviderOutcome::Fatal(format!("invalid storage key: {key}"));
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            return classify(&self.root, e);
        }

        // Readers never see a half-written object
        let temp = self.root.join(format!(".{key}.tmp"));
        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return classify(&temp, e);
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return classify(&path, e);
        }
        ProviderOutcome::Success(())
    }

    async fn list_keys(&self) -> ProviderOutcome<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return ProviderOutcome::Success(Vec::new()),
            Err(e) => return classify(&self.root, e),
        };

        let mut keys = Vec::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if is_file && !name.starts_with('.') {
                        keys.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => return classify(&self.root, e),
            }
        }
        keys.sort();
        ProviderOutcome::Success(keys)
    }

    async fn delete(&self, key: &str) -> ProviderOutcome<()> {
        let Some(path) = self.object_path(key) else {
            return ProviderOutcome::Fatal(format!("invalid storage key: {key}"));
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => ProviderOutcome::Success(()),
            Err(e) if e.kind() == ErrorKind::NotFound => ProviderOutcome::Success(()),
            Err(e) => classify(&path, e),
        }
    }

    async fn public_url(&self, key: &str) -> ProviderOutcome<String> {
        if let Some(base) = &self.public_base_url {
            let base = if base.ends_with('/') {
                base.clone()
            } else {
                format!("{base}/")
            };
            return match url::Url::parse(&base).and_then(|b| b.join(key)) {
                Ok(url) => ProviderOutcome::Success(url.to_string()),
                Err(e) => ProviderOutcome::Fatal(format!("invalid public base URL {base}: {e}")),
            };
        }

        let Some(path) = self.object_path(key) else {
            return ProviderOutcome::Fatal(format!("invalid storage key: {key}"));
        };
        let absolute = match std::path::absolute(&path) {
            Ok(p) => p,
            Err(e) => return classify(&path, e),
        };
        match url::Url::from_file_path(&absolute) {
            Ok(url) => ProviderOutcome::Success(url.to_string()),
            Err(()) => ProviderOutcome::Fatal(format!(
                "cannot express {} as a file URL",
                absolute.display()
            )),
        }
    }
}

fn classify<T>(path: &Path, e: std::io::Error) -> ProviderOutcome<T> {
    let reason = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
            ProviderOutcome::Fatal(reason)
        }
        _ => ProviderOutcome::Retry(reason),
    }
}
