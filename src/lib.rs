//! # edition-dl
//!
//! Unattended daily acquisition of a subscription publication into a rolling
//! retention archive.
//!
//! ## Design Philosophy
//!
//! edition-dl is designed to be:
//! - **Sequential and bounded** - One run at a time, one state machine, one overall deadline
//! - **Distrustful of the source** - Sessions and payloads are verified, never assumed
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to run events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use edition_dl::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None, Some(std::path::Path::new(".env")))?;
//!     let orchestrator = Orchestrator::from_config(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = orchestrator.run(None).await;
//!     println!("{}", result.message);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive store and storage providers
pub mod archive;
/// Browser automation for JavaScript-gated sources
pub mod browser;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Edition download
pub mod fetcher;
/// Edition link discovery
pub mod locator;
/// Acquisition state machine
pub mod orchestrator;
/// Retry logic with exponential backoff
pub mod retry;
/// Session authentication
pub mod session;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Content validation
pub mod validator;

// Re-export commonly used types
pub use archive::{
    ArchiveProvider, ArchiveStore, LocalProvider, MemoryProvider, ProviderOutcome, S3Provider,
};
pub use browser::{BrowserAutomation, BrowserlessClient};
pub use config::{Config, ProviderConfig};
pub use error::{
    AuthError, Error, ErrorCode, FailureReport, FetchError, LocatorError, Result, StoreError,
    ValidationError,
};
pub use orchestrator::{EditionSink, Orchestrator};
pub use session::{AuthSession, Authenticator};
pub use types::{
    ArchiveEntry, Clock, ContentFormat, EditionReference, Event, FixedClock, ProviderRole,
    PurgeReport, RawContent, RunResult, RunState, RunStatus, Stage, SystemClock,
};

/// Run one acquisition, cancelling it cleanly on a termination signal.
///
/// An interrupted run resolves to a `Failure` result whose failure code is
/// `cancelled` and whose step is the stage that was executing.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use edition_dl::{Config, Orchestrator, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::from_config(Config::load(None, None)?).await?;
///     let result = run_until_signal(&orchestrator, None).await;
///     std::process::exit(if result.acquired() { 0 } else { 1 });
/// }
/// ```
pub async fn run_until_signal(
    orchestrator: &Orchestrator,
    target: Option<chrono::NaiveDate>,
) -> RunResult {
    orchestrator.run_until(target, wait_for_signal()).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
