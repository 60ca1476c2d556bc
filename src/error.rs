//! Error types for edition-dl
//!
//! This module provides the error taxonomy for the acquisition pipeline:
//! - One error enum per component (authentication, location, fetch, validation, storage)
//! - A crate-level [`Error`] that wraps them and adds run-level failures
//! - Machine-readable error codes for alerting collaborators
//! - A serializable [`FailureReport`] carrying stage and context

use crate::types::{ProviderRole, Stage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for edition-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for edition-dl
///
/// Each component error converts into this type via `?`. Run-level failures
/// (timeouts, cancellation, overlapping runs) are expressed directly here.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "source.url")
        key: Option<String>,
    },

    /// Session authentication failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Edition could not be located
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),

    /// Edition could not be fetched
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Fetched content failed validation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Archive storage failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The overall run deadline elapsed
    #[error("run timed out during {stage}")]
    Timeout {
        /// Stage that was executing when the deadline elapsed
        stage: Stage,
    },

    /// The run was interrupted by a shutdown signal
    #[error("run cancelled during {stage}")]
    Cancelled {
        /// Stage that was executing when the signal arrived
        stage: Stage,
    },

    /// Another run is already in progress on this orchestrator
    #[error("another acquisition run is already in progress")]
    RunInProgress,
}

/// Session authentication errors
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The source explicitly rejected the supplied credentials
    #[error("credentials rejected: {reason}")]
    CredentialsRejected {
        /// Why the credentials are considered rejected
        reason: String,
    },

    /// Transient network failure talking to the source
    #[error("network failure during login: {reason}")]
    NetworkFailure {
        /// Underlying transport error
        reason: String,
    },

    /// The browser-automation path could not be started
    #[error("browser fallback unavailable: {reason}")]
    FallbackUnavailable {
        /// Why the browser path could not start
        reason: String,
    },

    /// Login completed but no session indicator could be confirmed
    #[error("session not authenticated after login (checked {url})")]
    NotAuthenticated {
        /// The page used to confirm the session
        url: String,
    },

    /// The login page did not contain a usable credential form
    #[error("no login form found at {url}")]
    LoginFormNotFound {
        /// The page that was searched for a form
        url: String,
    },
}

/// Edition location errors
#[derive(Debug, Clone, Error)]
pub enum LocatorError {
    /// No link on the page matched any locator tier
    #[error("no edition link for {target_date} found on {page}")]
    LinkNotFound {
        /// Page that was searched
        page: String,
        /// Requested edition date
        target_date: String,
    },

    /// The listing page could not be retrieved
    #[error("listing page {url} unavailable: {reason}")]
    PageUnavailable {
        /// Listing page URL
        url: String,
        /// Underlying failure
        reason: String,
        /// Whether the failure is network-origin and worth retrying
        retryable: bool,
    },
}

/// Content fetch errors
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transient network failure (connect, timeout, stream interrupted)
    #[error("network failure fetching {url}: {reason}")]
    NetworkFailure {
        /// URL being fetched
        url: String,
        /// Underlying transport error
        reason: String,
    },

    /// The source answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body was empty
    #[error("empty payload from {url}")]
    EmptyPayload {
        /// URL being fetched
        url: String,
    },

    /// The response was neither the expected asset nor a capturable page
    #[error("unexpected content type {content_type} from {url}")]
    UnexpectedContentType {
        /// URL being fetched
        url: String,
        /// Content type reported or sniffed
        content_type: String,
    },

    /// Writing the downloaded payload to disk failed
    #[error("failed to persist download to {path}: {reason}")]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },
}

/// Content validation errors
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// Content is structurally broken or not an edition
    #[error("corrupt content: {reason}")]
    CorruptContent {
        /// What check failed
        reason: String,
    },

    /// Content is a login page; the session expired mid-run
    #[error("login page detected instead of edition content")]
    LoginPageDetected,
}

/// Archive storage errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Provider is unreachable or returned a transient failure
    #[error("{provider} storage provider unavailable: {reason}")]
    ProviderUnavailable {
        /// Which provider failed
        provider: ProviderRole,
        /// Underlying failure
        reason: String,
    },

    /// Provider refused the operation
    #[error("{provider} storage provider denied access: {reason}")]
    PermissionDenied {
        /// Which provider failed
        provider: ProviderRole,
        /// Underlying failure
        reason: String,
    },
}

/// Failure summary handed to reporting and alerting collaborators
///
/// Mirrors the information needed to act on a failed run without reading logs.
///
/// # Example JSON
///
/// ```json
/// {
///   "code": "store_provider_unavailable",
///   "message": "storage error: primary storage provider unavailable: timeout",
///   "stage": "archiving",
///   "details": { "provider": "primary" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Machine-readable error code (e.g., "auth_credentials_rejected")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Stage the run was in when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    /// Optional additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl FailureReport {
    /// Create a report from an error and the stage where it surfaced
    pub fn new(error: &Error, stage: Stage) -> Self {
        let details = match error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Locator(LocatorError::LinkNotFound { page, target_date }) => {
                Some(serde_json::json!({ "page": page, "target_date": target_date }))
            }
            Error::Fetch(FetchError::HttpStatus { url, status }) => {
                Some(serde_json::json!({ "url": url, "status": status }))
            }
            Error::Fetch(FetchError::UnexpectedContentType { url, content_type }) => {
                Some(serde_json::json!({ "url": url, "content_type": content_type }))
            }
            Error::Store(StoreError::ProviderUnavailable { provider, .. })
            | Error::Store(StoreError::PermissionDenied { provider, .. }) => {
                Some(serde_json::json!({ "provider": provider }))
            }
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            stage: Some(stage),
            details,
        }
    }
}

/// Stable machine-readable codes for errors
pub trait ErrorCode {
    /// Get the machine-readable error code
    fn error_code(&self) -> &'static str;
}

impl ErrorCode for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(e) => match e {
                AuthError::CredentialsRejected { .. } => "auth_credentials_rejected",
                AuthError::NetworkFailure { .. } => "auth_network_failure",
                AuthError::FallbackUnavailable { .. } => "auth_fallback_unavailable",
                AuthError::NotAuthenticated { .. } => "auth_not_authenticated",
                AuthError::LoginFormNotFound { .. } => "auth_login_form_not_found",
            },
            Error::Locator(e) => match e {
                LocatorError::LinkNotFound { .. } => "locator_link_not_found",
                LocatorError::PageUnavailable { .. } => "locator_page_unavailable",
            },
            Error::Fetch(e) => match e {
                FetchError::NetworkFailure { .. } => "fetch_network_failure",
                FetchError::HttpStatus { .. } => "fetch_http_status",
                FetchError::EmptyPayload { .. } => "fetch_empty_payload",
                FetchError::UnexpectedContentType { .. } => "fetch_unexpected_content_type",
                FetchError::Io { .. } => "fetch_io_error",
            },
            Error::Validation(e) => match e {
                ValidationError::CorruptContent { .. } => "validation_corrupt_content",
                ValidationError::LoginPageDetected => "validation_login_page_detected",
            },
            Error::Store(e) => match e {
                StoreError::ProviderUnavailable { .. } => "store_provider_unavailable",
                StoreError::PermissionDenied { .. } => "store_permission_denied",
            },
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::RunInProgress => "run_in_progress",
        }
    }
}

impl Error {
    /// Whether this error signals an expired session rather than a hard failure
    pub fn is_session_expiry(&self) -> bool {
        matches!(self, Error::Validation(ValidationError::LoginPageDetected))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (Error, expected_error_code) for every reachable match arm
    fn all_error_variants() -> Vec<(Error, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "missing".into(),
                    key: Some("source.url".into()),
                },
                "config_error",
            ),
            (
                Error::Auth(AuthError::CredentialsRejected {
                    reason: "login form re-rendered".into(),
                }),
                "auth_credentials_rejected",
            ),
            (
                Error::Auth(AuthError::NetworkFailure {
                    reason: "connection reset".into(),
                }),
                "auth_network_failure",
            ),
            (
                Error::Auth(AuthError::FallbackUnavailable {
                    reason: "no browser endpoint".into(),
                }),
                "auth_fallback_unavailable",
            ),
            (
                Error::Auth(AuthError::NotAuthenticated {
                    url: "https://paper.example/".into(),
                }),
                "auth_not_authenticated",
            ),
            (
                Error::Auth(AuthError::LoginFormNotFound {
                    url: "https://paper.example/login".into(),
                }),
                "auth_login_form_not_found",
            ),
            (
                Error::Locator(LocatorError::LinkNotFound {
                    page: "https://paper.example/".into(),
                    target_date: "2024-03-01".into(),
                }),
                "locator_link_not_found",
            ),
            (
                Error::Locator(LocatorError::PageUnavailable {
                    url: "https://paper.example/editions".into(),
                    reason: "timeout".into(),
                    retryable: true,
                }),
                "locator_page_unavailable",
            ),
            (
                Error::Fetch(FetchError::NetworkFailure {
                    url: "https://paper.example/e.pdf".into(),
                    reason: "eof".into(),
                }),
                "fetch_network_failure",
            ),
            (
                Error::Fetch(FetchError::HttpStatus {
                    url: "https://paper.example/e.pdf".into(),
                    status: 404,
                }),
                "fetch_http_status",
            ),
            (
                Error::Fetch(FetchError::EmptyPayload {
                    url: "https://paper.example/e.pdf".into(),
                }),
                "fetch_empty_payload",
            ),
            (
                Error::Fetch(FetchError::UnexpectedContentType {
                    url: "https://paper.example/e.pdf".into(),
                    content_type: "image/png".into(),
                }),
                "fetch_unexpected_content_type",
            ),
            (
                Error::Fetch(FetchError::Io {
                    path: PathBuf::from("/tmp/x.part"),
                    reason: "disk full".into(),
                }),
                "fetch_io_error",
            ),
            (
                Error::Validation(ValidationError::CorruptContent {
                    reason: "missing %%EOF".into(),
                }),
                "validation_corrupt_content",
            ),
            (
                Error::Validation(ValidationError::LoginPageDetected),
                "validation_login_page_detected",
            ),
            (
                Error::Store(StoreError::ProviderUnavailable {
                    provider: ProviderRole::Primary,
                    reason: "503".into(),
                }),
                "store_provider_unavailable",
            ),
            (
                Error::Store(StoreError::PermissionDenied {
                    provider: ProviderRole::Secondary,
                    reason: "403".into(),
                }),
                "store_permission_denied",
            ),
            (
                Error::Io(std::io::Error::other("disk fail")),
                "io_error",
            ),
            (
                Error::Timeout {
                    stage: Stage::Fetching,
                },
                "timeout",
            ),
            (
                Error::Cancelled {
                    stage: Stage::Locating,
                },
                "cancelled",
            ),
            (Error::RunInProgress, "run_in_progress"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, expected_code) in all_error_variants() {
            assert_eq!(
                error.error_code(),
                expected_code,
                "error {error} returned the wrong code"
            );
        }
    }

    #[test]
    fn only_login_page_detection_counts_as_session_expiry() {
        for (error, code) in all_error_variants() {
            let expected = code == "validation_login_page_detected";
            assert_eq!(
                error.is_session_expiry(),
                expected,
                "is_session_expiry mismatch for {code}"
            );
        }
    }

    #[test]
    fn failure_report_carries_stage_and_provider_details() {
        let err = Error::Store(StoreError::ProviderUnavailable {
            provider: ProviderRole::Primary,
            reason: "timeout".into(),
        });
        let report = FailureReport::new(&err, Stage::Archiving);

        assert_eq!(report.code, "store_provider_unavailable");
        assert_eq!(report.stage, Some(Stage::Archiving));
        assert_eq!(report.message, err.to_string());
        let details = report.details.expect("should have details");
        assert_eq!(details["provider"], "primary");
    }

    #[test]
    fn failure_report_for_missing_link_names_page_and_date() {
        let err = Error::Locator(LocatorError::LinkNotFound {
            page: "https://paper.example/".into(),
            target_date: "2024-03-01".into(),
        });
        let report = FailureReport::new(&err, Stage::Locating);

        let details = report.details.expect("should have details");
        assert_eq!(details["page"], "https://paper.example/");
        assert_eq!(details["target_date"], "2024-03-01");
    }

    #[test]
    fn failure_report_without_details_omits_field_in_json() {
        let report = FailureReport::new(&Error::RunInProgress, Stage::Idle);

        let json_str = serde_json::to_string(&report).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed["code"], "run_in_progress");
        assert_eq!(parsed["stage"], "idle");
        assert!(
            parsed.get("details").is_none(),
            "details field should be omitted from JSON when None"
        );
    }

    #[test]
    fn timeout_message_names_the_stage() {
        let err = Error::Timeout {
            stage: Stage::Fetching,
        };
        assert_eq!(err.to_string(), "run timed out during fetching");
    }
}
