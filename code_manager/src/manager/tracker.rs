//! In-memory state of the test runs this process has accepted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Requested,
    Admitted,
    Queued,
    Exporting,
    Staging,
    Invoking,
    Parsing,
    Persisted,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Persisted | RunState::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Requested => write!(f, "requested"),
            RunState::Admitted => write!(f, "admitted"),
            RunState::Queued => write!(f, "queued"),
            RunState::Exporting => write!(f, "exporting"),
            RunState::Staging => write!(f, "staging"),
            RunState::Invoking => write!(f, "invoking"),
            RunState::Parsing => write!(f, "parsing"),
            RunState::Persisted => write!(f, "persisted"),
            RunState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedRun {
    grouping_id: i64,
    student: bool,
    state: RunState,
}

#[derive(Default)]
pub struct RunTracker {
    runs: Mutex<HashMap<String, TrackedRun>>,
    changed: Notify,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, TrackedRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a new run in [`RunState::Requested`].
    ///
    /// A student run is refused (returns `false`) while another student run of the same
    /// grouping has not finished. Check and insert happen under one lock.
    pub fn begin(&self, run_id: &str, grouping_id: i64, student: bool) -> bool {
        let mut runs = self.runs();
        if student
            && runs
                .values()
                .any(|r| r.student && r.grouping_id == grouping_id && !r.state.is_terminal())
        {
            return false;
        }
        runs.insert(
            run_id.to_string(),
            TrackedRun {
                grouping_id,
                student,
                state: RunState::Requested,
            },
        );
        true
    }

    pub fn advance(&self, run_id: &str, state: RunState) {
        if let Some(run) = self.runs().get_mut(run_id) {
            tracing::debug!(run_id, state = %state, "test run state changed");
            run.state = state;
        }
        self.changed.notify_waiters();
    }

    pub fn state(&self, run_id: &str) -> Option<RunState> {
        self.runs().get(run_id).map(|r| r.state.clone())
    }

    /// Waits until `run_id` reaches a terminal state. `None` for unknown runs.
    pub async fn wait_for(&self, run_id: &str) -> Option<RunState> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.state(run_id) {
                None => return None,
                Some(state) if state.is_terminal() => return Some(state),
                Some(_) => {}
            }

            notified.await;
        }
    }

    /// Forgets finished runs and returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut runs = self.runs();
        let before = runs.len();
        runs.retain(|_, r| !r.state.is_terminal());
        before - runs.len()
    }
}
