//! Retry logic with exponential backoff
//!
//! Network-origin failures in the pipeline (login exchanges, listing pages,
//! downloads, storage writes) are retried with exponential backoff and
//! optional jitter. Permanent failures surface on the first attempt.
//!
//! # Example
//!
//! ```no_run
//! use edition_dl::config::RetryConfig;
//! use edition_dl::error::FetchError;
//! use edition_dl::retry::with_retry;
//!
//! # async fn example(client: reqwest::Client, url: &str) -> Result<(), FetchError> {
//! let page = with_retry(&RetryConfig::default(), "front page", || {
//!     let client = client.clone();
//!     async move {
//!         let resp = client.get(url).send().await.map_err(|e| FetchError::NetworkFailure {
//!             url: url.to_string(),
//!             reason: e.to_string(),
//!         })?;
//!         if !resp.status().is_success() {
//!             let status = resp.status().as_u16();
//!             return Err(FetchError::HttpStatus { url: url.to_string(), status });
//!         }
//!         Ok(resp)
//!     }
//! })
//! .await?;
//! # drop(page);
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{AuthError, Error, FetchError, LocatorError, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, timeouts, 5xx) return `true`.
/// Permanent failures (rejected credentials, missing links, corrupt content) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for AuthError {
    fn is_retryable(&self) -> bool {
        matches!(self, AuthError::NetworkFailure { .. })
    }
}

impl IsRetryable for LocatorError {
    fn is_retryable(&self) -> bool {
        matches!(self, LocatorError::PageUnavailable { retryable: true, .. })
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::NetworkFailure { .. } => true,
            // 408 request timeout, 429 throttled, 5xx server side
            FetchError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::EmptyPayload { .. }
            | FetchError::UnexpectedContentType { .. }
            | FetchError::Io { .. } => false,
        }
    }
}

impl IsRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ProviderUnavailable { .. })
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Auth(e) => e.is_retryable(),
            Error::Locator(e) => e.is_retryable(),
            Error::Fetch(e) => e.is_retryable(),
            Error::Store(e) => e.is_retryable(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Validation(_)
            | Error::Config { .. }
            | Error::Serialization(_)
            | Error::Timeout { .. }
            | Error::Cancelled { .. }
            | Error::RunInProgress => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation_name` labels the retry log lines. The operation runs at most
/// `config.max_attempts` times, and at least once even when that is zero; the
/// last error is returned once attempts are exhausted or a non-retryable error
/// occurs.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                        .unwrap_or(config.max_delay);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        operation = operation_name,
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        operation = operation_name,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::types::ProviderRole;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn dropped() -> FetchError {
        FetchError::NetworkFailure {
            url: "https://paper.example/edition.pdf".into(),
            reason: "connection reset".into(),
        }
    }

    fn gone() -> FetchError {
        FetchError::HttpStatus {
            url: "https://paper.example/edition.pdf".into(),
            status: 410,
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), "download", || {
            let counter = c.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), "download", || {
            let counter = c.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(dropped())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), "download", || {
            let counter = c.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(dropped())
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::NetworkFailure { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "attempt cap is total tries");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(5), "download", || {
            let counter = c.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(gone())
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::HttpStatus { status: 410, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_max_attempts_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let _ = with_retry(&fast_config(0), "download", || {
            let counter = c.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(dropped())
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_is_never_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let _ = with_retry(&fast_config(1), "download", || {
            let counter = c.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(dropped())
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_waits_between_attempts() {
        let start = std::time::Instant::now();
        let _ = with_retry(&fast_config(4), "download", || async {
            Err::<i32, _>(dropped())
        })
        .await;

        // 10ms + 20ms + 40ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(70), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn delays_are_capped_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(60),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let _ = with_retry(&config, "download", || async {
            Err::<i32, _>(dropped())
        })
        .await;

        // 50ms + 60ms + 60ms rather than 50 + 500 + 5000
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(170), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn unrepresentable_backoff_saturates_at_max_delay() {
        for backoff_multiplier in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            let config = RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                backoff_multiplier,
                jitter: false,
            };
            let counter = Arc::new(AtomicU32::new(0));
            let c = counter.clone();

            let start = std::time::Instant::now();
            let result = with_retry(&config, "download", || {
                let counter = c.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(dropped())
                }
            })
            .await;

            assert!(result.is_err());
            assert_eq!(counter.load(Ordering::SeqCst), 3, "multiplier {backoff_multiplier}");
            // 5ms + 10ms
            assert!(start.elapsed() >= Duration::from_millis(15));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?}");
        }
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn network_failures_are_retryable() {
        assert!(
            Error::Auth(AuthError::NetworkFailure {
                reason: "reset".into()
            })
            .is_retryable()
        );
        assert!(
            Error::Fetch(FetchError::NetworkFailure {
                url: "u".into(),
                reason: "eof".into()
            })
            .is_retryable()
        );
        assert!(
            Error::Locator(LocatorError::PageUnavailable {
                url: "u".into(),
                reason: "timeout".into(),
                retryable: true,
            })
            .is_retryable()
        );
        assert!(
            Error::Store(StoreError::ProviderUnavailable {
                provider: ProviderRole::Primary,
                reason: "503".into()
            })
            .is_retryable()
        );
    }

    #[test]
    fn http_status_retryability_follows_status_class() {
        let status = |status| FetchError::HttpStatus {
            url: "u".into(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(401).is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(
            !Error::Auth(AuthError::CredentialsRejected {
                reason: "bad password".into()
            })
            .is_retryable()
        );
        assert!(
            !Error::Locator(LocatorError::PageUnavailable {
                url: "u".into(),
                reason: "404".into(),
                retryable: false,
            })
            .is_retryable()
        );
        assert!(!Error::Validation(ValidationError::LoginPageDetected).is_retryable());
        assert!(
            !Error::Store(StoreError::PermissionDenied {
                provider: ProviderRole::Secondary,
                reason: "403".into()
            })
            .is_retryable()
        );
        assert!(!Error::RunInProgress.is_retryable());
    }
}
