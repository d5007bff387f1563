//! Per-application lifecycle state.
//!
//! The [`StateStore`] exclusively owns one [`LifecycleState`] per catalog
//! entry. Entries are created once by [`StateStore::reconcile`] and the map
//! is never resized afterwards, so each entry carries its own lock and no
//! global lock is needed. All phase changes go through
//! [`StateStore::transition`], a compare-and-set that only succeeds when the
//! current phase is one the caller expected; that contract is what keeps at
//! most one operation in flight per application.

mod ledger;
mod phase;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{FailureCause, RunnerError, StateError};
use crate::runner::ProcessCanceller;

pub use self::ledger::AutostartLedger;
pub use self::phase::{Phase, Stage};

/// Tracing target for state transitions.
const STATE_TARGET: &str = "homestead_lifecycle::state";

/// Failure recorded against an application by the most recent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Stage that failed.
    pub stage: Stage,
    /// Classified reason.
    pub cause: FailureCause,
    /// When the failure was recorded.
    pub recorded_at: OffsetDateTime,
}

impl LastError {
    /// Records `cause` against `stage` at the current time.
    #[must_use]
    pub fn new(stage: Stage, cause: FailureCause) -> Self {
        Self {
            stage,
            cause,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }

    /// Classifies a runner error raised during `stage`.
    #[must_use]
    pub fn from_runner(stage: Stage, error: &RunnerError) -> Self {
        Self::new(stage, FailureCause::from(error))
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.cause)
    }
}

/// Snapshot of one application's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleState {
    /// Catalog identifier.
    pub id: String,
    /// Current phase.
    pub phase: Phase,
    /// Failure left by the most recent operation, if any.
    pub last_error: Option<LastError>,
    /// `download_directory/id`.
    pub install_path: PathBuf,
    /// Whether the application is registered to start with the session.
    pub autostart_enabled: bool,
    /// `true` while a command is running on the application's behalf.
    pub process_active: bool,
    /// Operating system id of that command, when known.
    pub process_id: Option<u32>,
    /// Time of the most recent transition.
    pub updated_at: OffsetDateTime,
}

/// Change applied to the failure record alongside a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Leave the failure record as it is.
    Keep,
    /// Clear the failure record.
    ClearError,
    /// Replace the failure record.
    RecordError(LastError),
}

/// Result of a successful compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase that was left.
    pub from: Phase,
    /// Phase that was entered.
    pub to: Phase,
    /// State after the transition.
    pub state: LifecycleState,
}

#[derive(Debug)]
struct Entry {
    state: LifecycleState,
    canceller: Option<ProcessCanceller>,
    cancel_requested: bool,
}

/// Owner of every application's [`LifecycleState`].
#[derive(Debug)]
pub struct StateStore {
    entries: HashMap<String, Mutex<Entry>>,
    order: Vec<String>,
    ledger: AutostartLedger,
}

impl StateStore {
    /// Builds the store from the filesystem.
    ///
    /// Every catalog entry starts `Installed` when `download_directory/id`
    /// is a directory and `NotInstalled` otherwise; autostart flags come from
    /// `ledger`. Ledger entries for ids outside the catalog are ignored.
    #[must_use]
    pub fn reconcile(catalog: &Catalog, download_directory: &Path, ledger: AutostartLedger) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut entries = HashMap::with_capacity(catalog.len());
        let mut order = Vec::with_capacity(catalog.len());
        for app in catalog.iter() {
            let install_path = download_directory.join(app.id());
            let phase = if install_path.is_dir() {
                Phase::Installed
            } else {
                Phase::NotInstalled
            };
            debug!(
                target: STATE_TARGET,
                app = app.id(),
                phase = %phase,
                path = %install_path.display(),
                "reconciled application"
            );
            let state = LifecycleState {
                id: app.id().to_owned(),
                phase,
                last_error: None,
                install_path,
                autostart_enabled: ledger.get(app.id()),
                process_active: false,
                process_id: None,
                updated_at: now,
            };
            order.push(state.id.clone());
            entries.insert(
                state.id.clone(),
                Mutex::new(Entry {
                    state,
                    canceller: None,
                    cancel_requested: false,
                }),
            );
        }
        info!(
            target: STATE_TARGET,
            applications = order.len(),
            download_directory = %download_directory.display(),
            "state reconciled from filesystem"
        );
        Self {
            entries,
            order,
            ledger,
        }
    }

    /// Returns a snapshot of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownApp`] when `id` has no entry.
    pub fn get(&self, id: &str) -> Result<LifecycleState, StateError> {
        Ok(self.lock(id)?.state.clone())
    }

    /// Returns snapshots of every application in catalog order.
    #[must_use]
    pub fn list(&self) -> Vec<LifecycleState> {
        self.order
            .iter()
            .filter_map(|id| self.lock(id).ok())
            .map(|entry| entry.state.clone())
            .collect()
    }

    /// Moves `id` to `next` if its current phase is one of `expected`.
    ///
    /// The failure record is updated according to `mutation` and the
    /// transition time is stamped. A pending cancellation request does not
    /// survive a transition.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownApp`] for an unknown id and
    /// [`StateError::Conflict`] when the phase did not match, in which case
    /// nothing is changed.
    pub fn transition(
        &self,
        id: &str,
        expected: &[Phase],
        next: Phase,
        mutation: Mutation,
    ) -> Result<Transition, StateError> {
        let mut entry = self.lock(id)?;
        let from = entry.state.phase;
        if !expected.contains(&from) {
            return Err(StateError::Conflict {
                id: id.to_owned(),
                expected: expected.to_vec(),
                actual: from,
            });
        }
        match mutation {
            Mutation::Keep => {}
            Mutation::ClearError => entry.state.last_error = None,
            Mutation::RecordError(error) => entry.state.last_error = Some(error),
        }
        entry.state.phase = next;
        entry.state.updated_at = OffsetDateTime::now_utc();
        entry.cancel_requested = false;
        debug!(target: STATE_TARGET, app = id, from = %from, to = %next, "phase transition");
        Ok(Transition {
            from,
            to: next,
            state: entry.state.clone(),
        })
    }

    /// Records the autostart flag for `id`, persisting it first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownApp`] or [`StateError::Persist`]; on
    /// failure the flag is unchanged.
    pub fn set_autostart(&self, id: &str, enabled: bool) -> Result<(), StateError> {
        let mut entry = self.lock(id)?;
        self.ledger.set(id, enabled)?;
        entry.state.autostart_enabled = enabled;
        Ok(())
    }

    /// Returns the autostart flag for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownApp`] when `id` has no entry.
    pub fn get_autostart(&self, id: &str) -> Result<bool, StateError> {
        Ok(self.lock(id)?.state.autostart_enabled)
    }

    /// Publishes the command now running for `id`.
    ///
    /// A cancellation requested before the command started is delivered
    /// immediately.
    pub(crate) fn attach_process(
        &self,
        id: &str,
        process_id: Option<u32>,
        canceller: ProcessCanceller,
    ) -> Result<(), StateError> {
        let mut entry = self.lock(id)?;
        if entry.cancel_requested {
            entry.cancel_requested = false;
            canceller.cancel();
        }
        entry.state.process_active = true;
        entry.state.process_id = process_id;
        entry.canceller = Some(canceller);
        Ok(())
    }

    /// Clears the command published by [`StateStore::attach_process`].
    pub(crate) fn detach_process(&self, id: &str) -> Result<(), StateError> {
        let mut entry = self.lock(id)?;
        entry.state.process_active = false;
        entry.state.process_id = None;
        entry.canceller = None;
        Ok(())
    }

    /// Cancels the running command of `id`.
    ///
    /// Returns `false` without side effects unless the phase is `Running`.
    /// When the command has not been attached yet the request is held until
    /// it is.
    pub(crate) fn cancel_running(&self, id: &str) -> Result<bool, StateError> {
        let mut entry = self.lock(id)?;
        if entry.state.phase != Phase::Running {
            return Ok(false);
        }
        if let Some(canceller) = entry.canceller.as_ref() {
            canceller.cancel();
            return Ok(true);
        }
        entry.cancel_requested = true;
        Ok(true)
    }

    fn lock(&self, id: &str) -> Result<MutexGuard<'_, Entry>, StateError> {
        let entry = self.entries.get(id).ok_or_else(|| StateError::UnknownApp {
            id: id.to_owned(),
        })?;
        Ok(entry.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
