//! Acquisition state machine
//!
//! One run walks `Idle → Authenticating → Locating → Fetching → Validating →
//! Archiving → Purging → Done`. Any component failure ends the run in
//! `Failed { stage, reason }`. A login page showing up at validation sends
//! the run back to `Authenticating` once; a second one is terminal.
//!
//! Every run yields exactly one [`RunResult`], including runs that time out,
//! are cancelled, or are refused because another run holds the guard.

mod sink;


pub use sink::EditionSink;

use crate::archive::ArchiveStore;
use crate::browser::{BrowserAutomation, BrowserlessClient};
use crate::config::Config;
use crate::error::{Error, FailureReport, Result, StoreError, ValidationError};
use crate::fetcher::Fetcher;
use crate::locator::Locator;
use crate::session::Authenticator;
use crate::types::{
    ArchiveEntry, Clock, Event, PurgeReport, RawContent, RunResult, RunState, RunStatus, Stage,
    SystemClock, format_date,
};
use crate::utils::retention_cutoff;
use crate::validator::Validator;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// What a completed acquisition produced
struct Acquisition {
    entry: ArchiveEntry,
    purge: std::result::Result<PurgeReport, StoreError>,
    already_archived: bool,
}

#[derive(Debug)]
struct Progress {
    state: RunState,
    reauthenticated: bool,
}

/// Drives one acquisition run at a time through the pipeline
pub struct Orchestrator {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    authenticator: Authenticator,
    locator: Locator,
    fetcher: Fetcher,
    validator: Validator,
    store: ArchiveStore,
    sink: Option<Arc<dyn EditionSink>>,
    event_tx: broadcast::Sender<Event>,
    run_guard: tokio::sync::Mutex<()>,
    progress: Mutex<Progress>,
}

impl Orchestrator {
    /// Assemble an orchestrator from explicit collaborators
    ///
    /// The store is switched to dry-run mode when `config.run.dry_run` is set.
    pub fn new(
        config: Arc<Config>,
        store: ArchiveStore,
        browser: Option<Arc<dyn BrowserAutomation>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(256);
        Self {
            authenticator: Authenticator::new(&config, browser),
            locator: Locator::new(&config),
            fetcher: Fetcher::new(&config),
            validator: Validator::new(&config),
            store: store.with_dry_run(config.run.dry_run),
            config,
            clock,
            sink: None,
            event_tx,
            run_guard: tokio::sync::Mutex::new(()),
            progress: Mutex::new(Progress {
                state: RunState::Idle,
                reauthenticated: false,
            }),
        }
    }

    /// Validate `config` and build every collaborator it describes
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let browser: Option<Arc<dyn BrowserAutomation>> = match &config.browser {
            Some(browser) => Some(Arc::new(BrowserlessClient::new(browser)?)),
            None => None,
        };
        let store = ArchiveStore::from_config(&config.storage, config.retry.clone()).await?;
        Ok(Self::new(
            Arc::new(config),
            store,
            browser,
            Arc::new(SystemClock),
        ))
    }

    /// Hand archived editions to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EditionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Configuration this orchestrator was built with
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Archive this orchestrator writes to
    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Current state of the state machine
    pub fn state(&self) -> RunState {
        self.progress().state.clone()
    }

    /// Archived editions inside the retention window, newest first
    pub async fn recent_editions(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self
            .store
            .list(self.config.storage.retention_days, self.clock.today())
            .await?)
    }

    /// Acquire the edition for `target` (today when `None`)
    pub async fn run(&self, target: Option<NaiveDate>) -> RunResult {
        self.run_until(target, std::future::pending()).await
    }

    /// Acquire the edition for `target`, abandoning the run if `shutdown`
    /// completes first
    pub async fn run_until<F>(&self, target: Option<NaiveDate>, shutdown: F) -> RunResult
    where
        F: Future<Output = ()>,
    {
        let today = self.clock.today();
        let target = target.unwrap_or(today);

        let Ok(_guard) = self.run_guard.try_lock() else {
            tracing::warn!(date = %target, "run refused, another run is in progress");
            return self.finish(target, Stage::Idle, Err(Error::RunInProgress), false);
        };

        {
            let mut progress = self.progress();
            progress.state = RunState::Idle;
            progress.reauthenticated = false;
        }
        tracing::info!(
            date = %target,
            dry_run = self.config.run.dry_run,
            "acquisition run started"
        );

        let deadline = self.config.run.timeout;
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(deadline, self.execute(target, today)) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout { stage: self.stage() }),
            },
            () = shutdown => Err(Error::Cancelled { stage: self.stage() }),
        };

        let stage = self.stage();
        let result = self.conclude(target, stage, outcome);
        self.emit(Event::RunFinished {
            result: result.clone(),
        });
        result
    }

    async fn execute(&self, target: NaiveDate, today: NaiveDate) -> Result<Acquisition> {
        if !self.config.run.force_download {
            match self.store.find(target).await {
                Ok(Some(entry)) => {
                    tracing::info!(
                        date = %target,
                        key = %entry.storage_key,
                        provider = %entry.provider,
                        "edition already archived, skipping acquisition"
                    );
                    let purge = self.purge(today).await;
                    return Ok(Acquisition {
                        entry,
                        purge,
                        already_archived: true,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(date = %target, error = %e, "could not check archive for an existing edition");
                }
            }
        }

        let mut reauthenticated = false;
        let content = loop {
            self.enter(Stage::Authenticating);
            let session = self.authenticator.authenticate().await?;
            self.emit(Event::Authenticated {
                path: session.path(),
                evidence: session.evidence().to_vec(),
            });

            self.enter(Stage::Locating);
            let reference = self.locator.locate(&session, target).await?;
            self.emit(Event::EditionLocated {
                reference: reference.clone(),
            });

            self.enter(Stage::Fetching);
            let content = self.fetcher.fetch(&session, &reference).await?;
            let local_path = content.local_path.clone();

            self.enter(Stage::Validating);
            match self.validator.validate(content, &reference) {
                Ok(content) => break content,
                Err(e) => {
                    if let Some(path) = local_path
                        && let Err(remove_err) = tokio::fs::remove_file(&path).await
                    {
                        tracing::warn!(path = %path.display(), error = %remove_err, "failed to remove rejected download");
                    }
                    if matches!(e, ValidationError::LoginPageDetected) && !reauthenticated {
                        tracing::warn!(date = %target, "session expired mid-run, re-authenticating once");
                        reauthenticated = true;
                        self.progress().reauthenticated = true;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        };

        self.enter(Stage::Archiving);
        let entry = self.store.store(target, &content).await?;
        self.emit(Event::Archived {
            entry: entry.clone(),
        });
        self.hand_off(&entry, &content).await;

        let purge = self.purge(today).await;
        Ok(Acquisition {
            entry,
            purge,
            already_archived: false,
        })
    }

    async fn purge(&self, today: NaiveDate) -> std::result::Result<PurgeReport, StoreError> {
        self.enter(Stage::Purging);
        let cutoff = retention_cutoff(today, self.config.storage.retention_days);
        let report = self.store.purge_older_than(cutoff).await;
        if self.config.run.dry_run {
            tracing::info!(cutoff = %cutoff, "[dry run] keeping local downloads");
        } else {
            self.fetcher.prune_downloads(cutoff).await;
        }
        match &report {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!(
                        cutoff = %cutoff,
                        failed = report.failed.len(),
                        "retention purge left expired editions behind"
                    );
                }
                self.emit(Event::PurgeCompleted {
                    report: report.clone(),
                });
            }
            Err(e) => tracing::error!(cutoff = %cutoff, error = %e, "retention purge failed"),
        }
        report
    }

    async fn hand_off(&self, entry: &ArchiveEntry, content: &RawContent) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.config.run.dry_run {
            tracing::warn!(sink = sink.name(), date = %entry.date, "[dry run] skipping edition hand-off");
            return;
        }
        if let Err(e) = sink.accept(entry, content).await {
            tracing::warn!(sink = sink.name(), date = %entry.date, error = %e, "edition hand-off failed");
        }
    }

    fn conclude(
        &self,
        target: NaiveDate,
        stage: Stage,
        outcome: Result<Acquisition>,
    ) -> RunResult {
        let reauthenticated = self.progress().reauthenticated;
        let outcome = outcome.map(|acquisition| {
            self.enter(Stage::Done);
            acquisition
        });
        if let Err(e) = &outcome {
            let failing = match e {
                Error::Timeout { stage } | Error::Cancelled { stage } => *stage,
                _ => stage,
            };
            self.transition(RunState::Failed {
                stage: failing,
                reason: e.to_string(),
            });
        }
        self.finish(target, stage, outcome, reauthenticated)
    }

    fn finish(
        &self,
        target: NaiveDate,
        stage: Stage,
        outcome: Result<Acquisition>,
        reauthenticated: bool,
    ) -> RunResult {
        let date = format_date(target);
        let timestamp = self.clock.now();

        let result = match outcome {
            Ok(Acquisition {
                entry,
                purge,
                already_archived,
            }) => {
                let acquired = if already_archived {
                    format!("edition {date} already archived on {}", entry.provider)
                } else {
                    format!("edition {date} archived on {}", entry.provider)
                };
                let (status, message, purge, failure) = match purge {
                    Ok(report) if report.is_clean() => (
                        RunStatus::Success,
                        format!("{acquired}; {} expired editions removed", report.removed),
                        Some(report),
                        None,
                    ),
                    Ok(report) => (
                        RunStatus::PartialFailure,
                        format!(
                            "{acquired}; purge removed {} but failed on {}",
                            report.removed,
                            report.failed.len()
                        ),
                        Some(report),
                        None,
                    ),
                    Err(e) => {
                        let error = Error::Store(e);
                        (
                            RunStatus::PartialFailure,
                            format!("{acquired}; retention purge failed: {error}"),
                            None,
                            Some(FailureReport::new(&error, Stage::Purging)),
                        )
                    }
                };
                RunResult {
                    status,
                    step: Stage::Done,
                    message,
                    timestamp,
                    target_date: target,
                    entry: Some(entry),
                    purge,
                    failure,
                    reauthenticated,
                }
            }
            Err(error) => {
                let step = match &error {
                    Error::Timeout { stage } | Error::Cancelled { stage } => *stage,
                    _ => stage,
                };
                RunResult {
                    status: RunStatus::Failure,
                    step,
                    message: format!("edition {date} not acquired: {error}"),
                    timestamp,
                    target_date: target,
                    entry: None,
                    purge: None,
                    failure: Some(FailureReport::new(&error, step)),
                    reauthenticated,
                }
            }
        };

        match result.status {
            RunStatus::Success => {
                tracing::info!(date = %target, message = %result.message, "acquisition run finished");
            }
            RunStatus::PartialFailure => {
                tracing::warn!(date = %target, message = %result.message, "acquisition run finished with purge failures");
            }
            RunStatus::Failure => {
                tracing::error!(
                    date = %target,
                    step = %result.step,
                    code = result.failure.as_ref().map(|f| f.code.as_str()).unwrap_or_default(),
                    message = %result.message,
                    "acquisition run failed"
                );
            }
        }
        result
    }

    fn stage(&self) -> Stage {
        self.progress().state.stage()
    }

    fn enter(&self, stage: Stage) {
        self.transition(RunState::from(stage));
    }

    fn transition(&self, to: RunState) {
        let from = {
            let mut progress = self.progress();
            std::mem::replace(&mut progress.state, to.clone())
        };
        tracing::debug!(from = ?from, to = ?to, "state transition");
        self.emit(Event::StateChanged { from, to });
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("store", &self.store)
            .field("dry_run", &self.config.run.dry_run)
            .finish_non_exhaustive()
    }
}
