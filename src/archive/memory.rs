//! In-memory backend
//!
//! Holds objects in a map and can be scripted to fail, which makes it the
//! backend of choice for dry runs in tests and for exercising failover.

use super::{ArchiveProvider, ProviderOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Failure a [`MemoryProvider`] can be told to report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Report a transient failure
    Retry,
    /// Report a permanent failure
    Fatal,
}

impl ScriptedFailure {
    fn outcome<T>(self, what: &str) -> ProviderOutcome<T> {
        match self {
            ScriptedFailure::Retry => ProviderOutcome::Retry(format!("{what}: service unavailable")),
            ScriptedFailure::Fatal => ProviderOutcome::Fatal(format!("{what}: access denied")),
        }
    }
}

/// A stored object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object bytes
    pub bytes: Bytes,
    /// Content type recorded at upload
    pub mime_type: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    put_failure: Option<ScriptedFailure>,
    put_failures_left: Option<u32>,
    list_failure: Option<ScriptedFailure>,
    delete_failures: BTreeMap<String, ScriptedFailure>,
    url_failures: BTreeMap<String, ScriptedFailure>,
    puts: u32,
    deletes: u32,
}

/// Map-backed archive provider
pub struct MemoryProvider {
    name: String,
    base_url: String,
    state: Mutex<State>,
}

impl MemoryProvider {
    /// Empty provider named `name`, serving URLs under `memory://{name}/`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base_url: format!("memory://{name}/"),
            name,
            state: Mutex::new(State::default()),
        }
    }

    /// Serve public URLs under `base_url` instead
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fail every upload
    pub fn fail_puts(&self, failure: ScriptedFailure) {
        let mut state = self.lock();
        state.put_failure = Some(failure);
        state.put_failures_left = None;
    }

    /// Fail the next `count` uploads, then succeed
    pub fn fail_next_puts(&self, failure: ScriptedFailure, count: u32) {
        let mut state = self.lock();
        state.put_failure = Some(failure);
        state.put_failures_left = Some(count);
    }

    /// Fail every listing
    pub fn fail_listing(&self, failure: ScriptedFailure) {
        self.lock().list_failure = Some(failure);
    }

    /// Fail every deletion of `key`
    pub fn fail_delete(&self, key: impl Into<String>, failure: ScriptedFailure) {
        self.lock().delete_failures.insert(key.into(), failure);
    }

    /// Fail every public URL request for `key`
    pub fn fail_public_url(&self, key: impl Into<String>, failure: ScriptedFailure) {
        self.lock().url_failures.insert(key.into(), failure);
    }

    /// Place an object directly, bypassing scripted failures
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>, mime_type: &str) {
        self.lock().objects.insert(
            key.into(),
            StoredObject {
                bytes: bytes.into(),
                mime_type: mime_type.to_string(),
            },
        );
    }

    /// Keys currently held, sorted
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Object stored under `key`
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Number of upload attempts seen, failed ones included
    pub fn put_calls(&self) -> u32 {
        self.lock().puts
    }

    /// Number of deletion attempts seen, failed ones included
    pub fn delete_calls(&self) -> u32 {
        self.lock().deletes
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("name", &self.name)
            .field("objects", &self.keys())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ArchiveProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, bytes: Bytes, mime_type: &str) -> ProviderOutcome<()> {
        let mut state = self.lock();
        state.puts += 1;

        if let Some(failure) = state.put_failure {
            match state.put_failures_left {
                None => return failure.outcome("put"),
                Some(0) => state.put_failure = None,
                Some(left) => {
                    state.put_failures_left = Some(left - 1);
                    return failure.outcome("put");
                }
            }
        }

        state.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        ProviderOutcome::Success(())
    }

    async fn list_keys(&self) -> ProviderOutcome<Vec<String>> {
        let state = self.lock();
        if let Some(failure) = state.list_failure {
            return failure.outcome("list");
        }
        ProviderOutcome::Success(state.objects.keys().cloned().collect())
    }

    async fn delete(&self, key: &str) -> ProviderOutcome<()> {
        let mut state = self.lock();
        state.deletes += 1;
        if let Some(failure) = state.delete_failures.get(key).copied() {
            return failure.outcome("delete");
        }
        state.objects.remove(key);
        ProviderOutcome::Success(())
    }

    async fn public_url(&self, key: &str) -> ProviderOutcome<String> {
        if let Some(failure) = self.lock().url_failures.get(key).copied() {
            return failure.outcome("presign");
        }
        ProviderOutcome::Success(format!("{}{key}", self.base_url))
    }
}
