//! Event and archive assertions for integration tests

use edition_dl::{Event, RunResult, RunState, RunStatus};
use tokio::sync::broadcast;

/// Drain every event already delivered to `events`
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// States entered, in order
pub fn states(events: &[Event]) -> Vec<RunState> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StateChanged { to, .. } => Some(to.clone()),
            _ => None,
        })
        .collect()
}

/// Number of `RunFinished` events
pub fn finished_count(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::RunFinished { .. }))
        .count()
}

/// Assert the run succeeded, printing its message otherwise
pub fn assert_success(result: &RunResult) {
    assert_eq!(
        result.status,
        RunStatus::Success,
        "run should succeed: {} ({:?})",
        result.message,
        result.failure
    );
}

/// Assert the run failed with `code`
pub fn assert_failure_code(result: &RunResult, code: &str) {
    assert_eq!(
        result.status,
        RunStatus::Failure,
        "run should fail: {}",
        result.message
    );
    let failure = result.failure.as_ref().expect("failure report");
    assert_eq!(failure.code, code, "{}", failure.message);
}
