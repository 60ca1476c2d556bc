//! Core types for edition-dl

use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::error::FailureReport;

/// Canonical date format for editions and storage keys
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format an edition date in canonical `YYYY-MM-DD` form
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Content format of an edition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentFormat {
    /// Portable Document Format asset
    Pdf,
    /// Rendered HTML document
    Html,
}

impl ContentFormat {
    /// File extension used in storage keys
    pub fn extension(&self) -> &'static str {
        match self {
            ContentFormat::Pdf => "pdf",
            ContentFormat::Html => "html",
        }
    }

    /// MIME type recorded on archived objects
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentFormat::Pdf => "application/pdf",
            ContentFormat::Html => "text/html; charset=utf-8",
        }
    }

    /// Parse a storage-key extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(ContentFormat::Pdf),
            "html" | "htm" => Some(ContentFormat::Html),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentFormat::Pdf => write!(f, "PDF"),
            ContentFormat::Html => write!(f, "HTML"),
        }
    }
}

/// Which locator tier produced an edition link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorUsed {
    /// The per-deployment override selector
    Override,
    /// A link embedding the target date
    DateMatch,
    /// A link labelled latest/current/today
    FreshnessKeyword,
}

/// Resolved identity of one day's edition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionReference {
    /// Requested edition date (never inferred from content)
    pub date: NaiveDate,
    /// Absolute URL of the edition asset or page
    pub source_url: String,
    /// Expected content format
    pub content_format: ContentFormat,
    /// Locator tier that matched
    pub selector_used: SelectorUsed,
}

/// Fetched edition payload
///
/// Constructed only through [`RawContent::new`], which rejects empty payloads.
#[derive(Clone, Debug)]
pub struct RawContent {
    /// Edition date this payload belongs to
    pub date: NaiveDate,
    /// Format of the payload
    pub format: ContentFormat,
    /// Payload bytes
    pub bytes: Bytes,
    /// Hex-encoded SHA-256 of the payload
    pub sha256: String,
    /// Local download path, when the payload was streamed to disk
    pub local_path: Option<PathBuf>,
}

impl RawContent {
    /// Wrap a payload, returning `None` when it is empty
    pub fn new(date: NaiveDate, format: ContentFormat, bytes: Bytes) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let sha256 = hex_digest(&bytes);
        Some(Self {
            date,
            format,
            bytes,
            sha256,
            local_path: None,
        })
    }

    /// Record where the payload was written on disk
    pub fn with_local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    /// Payload size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Which configured storage backend holds an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    /// Preferred backend
    Primary,
    /// Failover backend
    Secondary,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderRole::Primary => write!(f, "primary"),
            ProviderRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Persisted archive unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Edition date
    pub date: NaiveDate,
    /// Deterministic object key (`{date}.{ext}`)
    pub storage_key: String,
    /// MIME type of the stored object
    pub mime_type: String,
    /// Externally addressable URL
    pub public_url: String,
    /// Backend that stored the object
    pub provider: ProviderRole,
    /// Content checksum, when known from this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Build the storage key for an edition: a pure function of date and format
pub fn storage_key(date: NaiveDate, format: ContentFormat) -> String {
    format!("{}.{}", format_date(date), format.extension())
}

/// Parse a storage key back into its date and format
///
/// Returns `None` for keys that do not follow the `{date}.{ext}` layout.
pub fn parse_storage_key(key: &str) -> Option<(NaiveDate, ContentFormat)> {
    let name = key.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    let date = NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()?;
    let format = ContentFormat::from_extension(ext)?;
    Some((date, format))
}

/// Pipeline stage reached by a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Not started
    Idle,
    /// Establishing a session
    Authenticating,
    /// Finding the edition link
    Locating,
    /// Downloading the edition
    Fetching,
    /// Checking the payload
    Validating,
    /// Persisting to the archive
    Archiving,
    /// Enforcing the retention window
    Purging,
    /// Finished successfully
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Authenticating => "authenticating",
            Stage::Locating => "locating",
            Stage::Fetching => "fetching",
            Stage::Validating => "validating",
            Stage::Archiving => "archiving",
            Stage::Purging => "purging",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// State of the acquisition state machine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Initial state
    Idle,
    /// Authenticator running
    Authenticating,
    /// Locator running
    Locating,
    /// Fetcher running
    Fetching,
    /// Validator running
    Validating,
    /// Archive store writing
    Archiving,
    /// Retention purge running
    Purging,
    /// Terminal success
    Done,
    /// Terminal failure
    Failed {
        /// Stage where the failure surfaced
        stage: Stage,
        /// Failure reason
        reason: String,
    },
}

impl RunState {
    /// Stage this state corresponds to (the failing stage for `Failed`)
    pub fn stage(&self) -> Stage {
        match self {
            RunState::Idle => Stage::Idle,
            RunState::Authenticating => Stage::Authenticating,
            RunState::Locating => Stage::Locating,
            RunState::Fetching => Stage::Fetching,
            RunState::Validating => Stage::Validating,
            RunState::Archiving => Stage::Archiving,
            RunState::Purging => Stage::Purging,
            RunState::Done => Stage::Done,
            RunState::Failed { stage, .. } => *stage,
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

impl From<Stage> for RunState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Idle => RunState::Idle,
            Stage::Authenticating => RunState::Authenticating,
            Stage::Locating => RunState::Locating,
            Stage::Fetching => RunState::Fetching,
            Stage::Validating => RunState::Validating,
            Stage::Archiving => RunState::Archiving,
            Stage::Purging => RunState::Purging,
            Stage::Done => RunState::Done,
        }
    }
}

/// How a session was established
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPath {
    /// Direct form submission over HTTP
    Form,
    /// Scripted browser login
    Browser,
}

/// Indicator that confirmed an authenticated session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvidence {
    /// A logout link or account element is present
    LogoutIndicator,
    /// A welcome string naming the configured account is present
    WelcomeUsername,
    /// The login exchange left a non-empty session cookie set
    SessionCookie,
}

/// One entry that could not be deleted during a purge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeFailure {
    /// Object key (or `*` when the provider listing itself failed)
    pub storage_key: String,
    /// Backend that failed
    pub provider: ProviderRole,
    /// Failure reason
    pub reason: String,
}

/// Outcome of a retention purge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Entries strictly older than this date were targeted
    pub cutoff: NaiveDate,
    /// Number of entries actually removed
    pub removed: usize,
    /// Entries that failed deletion
    pub failed: Vec<PurgeFailure>,
}

impl PurgeReport {
    /// Whether every targeted entry was removed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Overall outcome of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Edition acquired and retention enforced
    Success,
    /// Edition acquired, purge left residual failures
    PartialFailure,
    /// Edition not acquired
    Failure,
}

/// Summary of one orchestration pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    /// Overall outcome
    pub status: RunStatus,
    /// Stage reached (the failing stage on failure)
    pub step: Stage,
    /// Human-readable summary
    pub message: String,
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Edition date the run targeted
    pub target_date: NaiveDate,
    /// Archived edition, when acquired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ArchiveEntry>,
    /// Purge outcome, when the purge ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge: Option<PurgeReport>,
    /// Failure context, when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Whether the run re-authenticated after a mid-run session expiry
    pub reauthenticated: bool,
}

impl RunResult {
    /// Whether the edition was acquired (success or partial failure)
    pub fn acquired(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::PartialFailure)
    }
}

/// Events emitted by the orchestrator
///
/// Consumers subscribe via [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The state machine moved
    StateChanged {
        /// Previous state
        from: RunState,
        /// New state
        to: RunState,
    },
    /// A session was established
    Authenticated {
        /// Path that produced the session
        path: AuthPath,
        /// Indicators that confirmed it
        evidence: Vec<AuthEvidence>,
    },
    /// The edition link was resolved
    EditionLocated {
        /// Resolved reference
        reference: EditionReference,
    },
    /// The edition was persisted
    Archived {
        /// Stored entry
        entry: ArchiveEntry,
    },
    /// The retention purge finished
    PurgeCompleted {
        /// Purge outcome
        report: PurgeReport,
    },
    /// The run reached a terminal state
    RunFinished {
        /// Final result
        result: RunResult,
    },
}

/// Source of "now" for a run
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date used for target dates and retention
    fn today(&self) -> NaiveDate;
}

/// Wall-clock time; `today` follows the local calendar
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed instant
#[derive(Clone, Copy, Debug)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    /// Pin the clock to an instant
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Pin the clock to midday UTC on a date
    pub fn on(date: NaiveDate) -> Self {
        let now = date
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn storage_key_is_date_plus_extension() {
        assert_eq!(storage_key(d("2024-03-01"), ContentFormat::Pdf), "2024-03-01.pdf");
        assert_eq!(
            storage_key(d("2024-12-31"), ContentFormat::Html),
            "2024-12-31.html"
        );
    }

    #[test]
    fn parse_storage_key_accepts_prefixed_keys() {
        assert_eq!(
            parse_storage_key("archive/2024-03-01.pdf"),
            Some((d("2024-03-01"), ContentFormat::Pdf))
        );
        assert_eq!(
            parse_storage_key("2024-02-29.HTML"),
            Some((d("2024-02-29"), ContentFormat::Html))
        );
    }

    #[test]
    fn parse_storage_key_rejects_foreign_objects() {
        assert_eq!(parse_storage_key("2024-03-01_thumbnail.jpg"), None);
        assert_eq!(parse_storage_key("README"), None);
        assert_eq!(parse_storage_key("2024-13-01.pdf"), None);
        assert_eq!(parse_storage_key(".2024-03-01.pdf.tmp"), None);
    }

    #[test]
    fn raw_content_rejects_empty_payload() {
        assert!(RawContent::new(d("2024-03-01"), ContentFormat::Pdf, Bytes::new()).is_none());
    }

    #[test]
    fn raw_content_records_size_and_checksum() {
        let content = RawContent::new(
            d("2024-03-01"),
            ContentFormat::Html,
            Bytes::from_static(b"abc"),
        )
        .unwrap();
        assert_eq!(content.size_bytes(), 3);
        assert_eq!(
            content.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn run_state_reports_failing_stage() {
        let failed = RunState::Failed {
            stage: Stage::Fetching,
            reason: "timeout".into(),
        };
        assert_eq!(failed.stage(), Stage::Fetching);
        assert!(failed.is_terminal());
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::Purging.is_terminal());
    }

    #[test]
    fn fixed_clock_today_is_pinned_date() {
        let clock = FixedClock::on(d("2024-03-01"));
        assert_eq!(clock.today(), d("2024-03-01"));
    }

    #[test]
    fn content_format_serializes_uppercase() {
        let json = serde_json::to_string(&ContentFormat::Pdf).unwrap();
        assert_eq!(json, "\"PDF\"");
    }
}
