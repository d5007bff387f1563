//! The application lifecycle state machine.
//!
//! Every public operation starts with one compare-and-set transition into an
//! in-flight phase, performed synchronously so a refused operation fails
//! before anything else happens. Accepted operations continue on a Tokio
//! task and end with a terminal transition; their result is available
//! through the returned [`PendingOperation`]. Stage failures are never
//! retried: they are recorded as the application's last error and leave it
//! in the phase the state machine prescribes.
//!
//! ```text
//! NotInstalled ─install→ Cloning → [Installing] → [Setup] → Installed
//! Installed ─run→ Running ─exit→ Installed
//! Installed ─update→ Updating → [Setup] → Installed
//! Installed | InstallFailed | SetupFailed ─uninstall→ Removing → NotInstalled
//! ```

mod events;
mod git;
mod outcome;
mod pipeline;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use homestead_config::Settings;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::autostart::AutostartRegistry;
use crate::catalog::{AppDescriptor, Catalog};
use crate::error::{OrchestratorError, StateError};
use crate::runner::{CommandExecutor, CommandSpec, OutputStream, ProcessHandle};
use crate::state::{LastError, LifecycleState, Mutation, Phase, Stage, StateStore, Transition};

pub use self::events::{EVENT_CAPACITY, LifecycleEvent};
pub use self::outcome::{Operation, Outcome, PendingOperation};

/// Tracing target for orchestrator decisions.
pub(crate) const ORCHESTRATOR_TARGET: &str = "homestead_lifecycle::orchestrator";

/// Program used for clone and update.
pub const DEFAULT_GIT_PROGRAM: &str = "git";

/// Behaviour switches for an [`Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Start the application after a successful install.
    pub run_after_install: bool,
    /// Upper bound for each clone, install, setup and pull command.
    pub stage_timeout: Option<Duration>,
    /// Git executable.
    pub git_program: String,
}

impl OrchestratorOptions {
    /// Options reflecting persisted settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            run_after_install: settings.run_after_install,
            ..Self::default()
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            run_after_install: true,
            stage_timeout: None,
            git_program: String::from(DEFAULT_GIT_PROGRAM),
        }
    }
}

struct Inner {
    catalog: Arc<Catalog>,
    store: Arc<StateStore>,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<dyn AutostartRegistry>,
    options: OrchestratorOptions,
    events: broadcast::Sender<LifecycleEvent>,
    runtime: Handle,
}

/// Drives applications through their lifecycle.
///
/// Cloning is cheap; clones share state, collaborators and the event
/// channel.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("applications", &self.inner.catalog.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over `store`, which must have been reconciled
    /// from `catalog`.
    ///
    /// Background work runs on the Tokio runtime that is current when this
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoRuntime`] outside a Tokio runtime.
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<StateStore>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<dyn AutostartRegistry>,
        options: OrchestratorOptions,
    ) -> Result<Self, OrchestratorError> {
        let runtime = Handle::try_current().map_err(|_| OrchestratorError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                store,
                executor,
                registry,
                options,
                events,
                runtime,
            }),
        })
    }

    /// The catalog the orchestrator serves.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &OrchestratorOptions {
        &self.inner.options
    }

    /// Receives every event published after this call.
    ///
    /// Subscribers that fall more than [`EVENT_CAPACITY`] events behind miss
    /// the oldest ones.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of one application.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] for ids outside the catalog.
    pub fn state(&self, id: &str) -> Result<LifecycleState, OrchestratorError> {
        self.inner.store.get(id).map_err(into_orchestrator_error)
    }

    /// Snapshots of every application in catalog order.
    #[must_use]
    pub fn list(&self) -> Vec<LifecycleState> {
        self.inner.store.list()
    }

    /// Installs `id` from its source repository.
    ///
    /// Accepted from `NotInstalled`, `InstallFailed` and `SetupFailed`. Any
    /// existing install directory is removed before cloning.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] or
    /// [`OrchestratorError::OperationRejected`].
    pub fn install(&self, id: &str) -> Result<PendingOperation, OrchestratorError> {
        let app = self.descriptor(id)?.clone();
        let accepted = self.begin(id, Operation::Install, Phase::INSTALLABLE, Phase::Cloning)?;
        let this = self.clone();
        Ok(self.spawn_operation(
            id,
            Operation::Install,
            Stage::Clone,
            this.install_pipeline(app, accepted.state.install_path),
        ))
    }

    /// Pulls upstream changes for `id`, re-running setup when they arrive.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] or
    /// [`OrchestratorError::OperationRejected`] unless `id` is `Installed`.
    pub fn update(&self, id: &str) -> Result<PendingOperation, OrchestratorError> {
        let app = self.descriptor(id)?.clone();
        let accepted = self.begin(id, Operation::Update, &[Phase::Installed], Phase::Updating)?;
        let this = self.clone();
        Ok(self.spawn_operation(
            id,
            Operation::Update,
            Stage::Update,
            this.update_pipeline(app, accepted.state.install_path),
        ))
    }

    /// Starts `id` and returns once its start command is running.
    ///
    /// The application returns to `Installed` when the command exits; a
    /// non-zero status or an unrequested signal is recorded as the last
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] or
    /// [`OrchestratorError::OperationRejected`] unless `id` is `Installed`.
    pub fn run(&self, id: &str) -> Result<PendingOperation, OrchestratorError> {
        let app = self.descriptor(id)?;
        let accepted = self.begin(id, Operation::Run, &[Phase::Installed], Phase::Running)?;
        let spec = CommandSpec::shell(app.start_command(), accepted.state.install_path);

        let spawned = {
            let _entered = self.inner.runtime.enter();
            self.inner.executor.spawn(&spec)
        };
        let this = self.clone();
        let app_id = id.to_owned();
        match spawned {
            Ok(handle) => {
                self.attach(id, &handle);
                info!(
                    target: ORCHESTRATOR_TARGET,
                    app = id,
                    pid = ?handle.process_id(),
                    "application started"
                );
                Ok(self.spawn_operation(
                    id,
                    Operation::Run,
                    Stage::Run,
                    this.supervise_run(app_id, handle),
                ))
            }
            Err(error) => {
                let failure = LastError::from_runner(Stage::Run, &error);
                let outcome = this.fail(&app_id, Phase::Running, Phase::Installed, failure);
                Ok(self.spawn_operation(id, Operation::Run, Stage::Run, async move { outcome }))
            }
        }
    }

    /// Stops the running command of `id`.
    ///
    /// Returns `true` when a cancellation was requested and `false` when
    /// `id` was not running; calling it repeatedly is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] for ids outside the catalog.
    pub fn cancel_run(&self, id: &str) -> Result<bool, OrchestratorError> {
        self.descriptor(id)?;
        let requested = self
            .inner
            .store
            .cancel_running(id)
            .map_err(into_orchestrator_error)?;
        let operation = Operation::CancelRun;
        if requested {
            info!(target: ORCHESTRATOR_TARGET, app = id, %operation, "cancellation requested");
        } else {
            debug!(target: ORCHESTRATOR_TARGET, app = id, %operation, "nothing running to cancel");
        }
        Ok(requested)
    }

    /// Registers `id` to start with the session.
    ///
    /// The stored flag changes only after the registry confirms.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`],
    /// [`OrchestratorError::OperationRejected`] unless `id` is `Installed`
    /// or `Running`, [`OrchestratorError::Registry`], or
    /// [`OrchestratorError::State`] when the flag cannot be persisted.
    pub fn enable_autostart(&self, id: &str) -> Result<(), OrchestratorError> {
        let app = self.descriptor(id)?;
        let state = self.require_phase(id, Operation::EnableAutostart)?;
        self.inner
            .registry
            .enable(id, app.start_command(), &state.install_path)?;
        if let Err(error) = self.inner.store.set_autostart(id, true) {
            // Keep the registry and the ledger in agreement.
            if let Err(rollback) = self.inner.registry.disable(id) {
                warn!(
                    target: ORCHESTRATOR_TARGET,
                    app = id,
                    error = %rollback,
                    "failed to roll back autostart entry"
                );
            }
            return Err(into_orchestrator_error(error));
        }
        info!(target: ORCHESTRATOR_TARGET, app = id, "autostart enabled");
        Ok(())
    }

    /// Removes `id` from session startup.
    ///
    /// # Errors
    ///
    /// As [`Orchestrator::enable_autostart`].
    pub fn disable_autostart(&self, id: &str) -> Result<(), OrchestratorError> {
        self.descriptor(id)?;
        self.require_phase(id, Operation::DisableAutostart)?;
        self.inner.registry.disable(id)?;
        self.inner
            .store
            .set_autostart(id, false)
            .map_err(into_orchestrator_error)?;
        info!(target: ORCHESTRATOR_TARGET, app = id, "autostart disabled");
        Ok(())
    }

    /// Removes the install directory of `id`, deregistering autostart
    /// first when it is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownApp`] or
    /// [`OrchestratorError::OperationRejected`] unless `id` is `Installed`,
    /// `InstallFailed` or `SetupFailed`.
    pub fn uninstall(&self, id: &str) -> Result<PendingOperation, OrchestratorError> {
        self.descriptor(id)?;
        let accepted = self.begin(id, Operation::Uninstall, Phase::REMOVABLE, Phase::Removing)?;
        let this = self.clone();
        Ok(self.spawn_operation(
            id,
            Operation::Uninstall,
            Stage::Uninstall,
            this.removal_pipeline(accepted),
        ))
    }

    /// Uninstalls every application that is currently removable.
    ///
    /// Returns one entry per attempted application; entries whose phase
    /// changed concurrently carry the rejection.
    #[must_use]
    pub fn clear_installed(&self) -> Vec<(String, Result<PendingOperation, OrchestratorError>)> {
        self.list()
            .into_iter()
            .filter(|state| Phase::REMOVABLE.contains(&state.phase))
            .map(|state| {
                let result = self.uninstall(&state.id);
                (state.id, result)
            })
            .collect()
    }

    fn descriptor(&self, id: &str) -> Result<&AppDescriptor, OrchestratorError> {
        self.inner
            .catalog
            .find(id)
            .ok_or_else(|| OrchestratorError::UnknownApp { id: id.to_owned() })
    }

    fn require_phase(
        &self,
        id: &str,
        operation: Operation,
    ) -> Result<LifecycleState, OrchestratorError> {
        let state = self.state(id)?;
        if Phase::AUTOSTART_EDITABLE.contains(&state.phase) {
            return Ok(state);
        }
        info!(
            target: ORCHESTRATOR_TARGET,
            app = id,
            %operation,
            phase = %state.phase,
            "operation rejected"
        );
        Err(OrchestratorError::OperationRejected {
            id: id.to_owned(),
            operation,
            phase: state.phase,
        })
    }

    /// Performs the accepting transition of `operation`.
    fn begin(
        &self,
        id: &str,
        operation: Operation,
        expected: &[Phase],
        next: Phase,
    ) -> Result<Transition, OrchestratorError> {
        match self.transition(id, expected, next, Mutation::ClearError) {
            Ok(accepted) => {
                info!(target: ORCHESTRATOR_TARGET, app = id, %operation, "operation accepted");
                Ok(accepted)
            }
            Err(StateError::Conflict { actual, .. }) => {
                info!(
                    target: ORCHESTRATOR_TARGET,
                    app = id,
                    %operation,
                    phase = %actual,
                    "operation rejected"
                );
                Err(OrchestratorError::OperationRejected {
                    id: id.to_owned(),
                    operation,
                    phase: actual,
                })
            }
            Err(error) => Err(into_orchestrator_error(error)),
        }
    }

    /// Transitions through the store and publishes the phase change.
    fn transition(
        &self,
        id: &str,
        expected: &[Phase],
        next: Phase,
        mutation: Mutation,
    ) -> Result<Transition, StateError> {
        let transition = self.inner.store.transition(id, expected, next, mutation)?;
        self.publish(LifecycleEvent::PhaseChanged {
            app_id: id.to_owned(),
            from: transition.from,
            to: transition.to,
        });
        Ok(transition)
    }

    fn spawn_operation<F>(
        &self,
        id: &str,
        operation: Operation,
        stage: Stage,
        work: F,
    ) -> PendingOperation
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let task = self.inner.runtime.spawn(work);
        PendingOperation::new(id.to_owned(), operation, stage, task)
    }

    fn attach(&self, id: &str, handle: &ProcessHandle) {
        if let Err(error) = self
            .inner
            .store
            .attach_process(id, handle.process_id(), handle.canceller())
        {
            warn!(target: ORCHESTRATOR_TARGET, app = id, %error, "failed to record process");
        }
    }

    fn detach(&self, id: &str) {
        if let Err(error) = self.inner.store.detach_process(id) {
            warn!(target: ORCHESTRATOR_TARGET, app = id, %error, "failed to clear process");
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // Sending only fails when nobody is subscribed.
        drop(self.inner.events.send(event));
    }

    fn publish_output(&self, id: &str, stage: Stage, stream: OutputStream, line: String) {
        self.publish(LifecycleEvent::Output {
            app_id: id.to_owned(),
            stage,
            stream,
            line,
        });
    }
}

fn into_orchestrator_error(error: StateError) -> OrchestratorError {
    match error {
        StateError::UnknownApp { id } => OrchestratorError::UnknownApp { id },
        other => OrchestratorError::State(other),
    }
}
