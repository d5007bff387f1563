//! Bodies of the background tasks behind accepted operations.
//!
//! Stages run strictly one after another; each awaits its command's exit
//! before the next transition. Only the task that performed the accepting
//! transition moves the application out of its in-flight phase.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::{ORCHESTRATOR_TARGET, Orchestrator, Outcome, git};
use crate::catalog::AppDescriptor;
use crate::error::FailureCause;
use crate::runner::{CommandSpec, OutputStream, ProcessHandle};
use crate::state::{LastError, Mutation, Phase, Stage, Transition};

impl Orchestrator {
    pub(super) async fn install_pipeline(self, app: AppDescriptor, path: PathBuf) -> Outcome {
        let id = app.id();
        if let Err(failure) = self.clone_checkout(&app, &path).await {
            self.discard_checkout(id, &path).await;
            return self.fail(id, Phase::Cloning, Phase::NotInstalled, failure);
        }

        let stages = [
            (Stage::Install, Phase::Installing, Phase::InstallFailed, app.install_command()),
            (Stage::Setup, Phase::Setup, Phase::SetupFailed, app.setup_command()),
        ];
        let mut phase = Phase::Cloning;
        for (stage, active, failed, configured) in stages {
            let Some(line) = configured else {
                continue;
            };
            if let Err(failure) = self.step(id, stage, phase, active) {
                return Outcome::Failed(failure);
            }
            phase = active;
            let spec = self.stage_command(CommandSpec::shell(line, &path));
            if let Err(failure) = self.execute(id, stage, &spec).await {
                return self.fail(id, phase, failed, failure);
            }
        }
        if let Err(failure) = self.step(id, Stage::Setup, phase, Phase::Installed) {
            return Outcome::Failed(failure);
        }
        info!(target: ORCHESTRATOR_TARGET, app = id, path = %path.display(), "application installed");

        let run = if self.inner.options.run_after_install {
            self.run(id)
                .inspect_err(|error| {
                    warn!(target: ORCHESTRATOR_TARGET, app = id, %error, "run after install refused");
                })
                .ok()
        } else {
            None
        };
        Outcome::Installed { run }
    }

    pub(super) async fn update_pipeline(self, app: AppDescriptor, path: PathBuf) -> Outcome {
        let id = app.id();
        let changed = match self.pull_changes(id, &path).await {
            Ok(changed) => changed,
            Err(failure) => return self.fail(id, Phase::Updating, Phase::Installed, failure),
        };
        if !changed {
            if let Err(failure) = self.step(id, Stage::Update, Phase::Updating, Phase::Installed) {
                return Outcome::Failed(failure);
            }
            info!(target: ORCHESTRATOR_TARGET, app = id, "already up to date");
            return Outcome::UpToDate;
        }

        let mut phase = Phase::Updating;
        if let Some(line) = app.setup_command() {
            if let Err(failure) = self.step(id, Stage::Setup, phase, Phase::Setup) {
                return Outcome::Failed(failure);
            }
            phase = Phase::Setup;
            let spec = self.stage_command(CommandSpec::shell(line, &path));
            if let Err(failure) = self.execute(id, Stage::Setup, &spec).await {
                return self.fail(id, phase, Phase::SetupFailed, failure);
            }
        }
        if let Err(failure) = self.step(id, Stage::Update, phase, Phase::Installed) {
            return Outcome::Failed(failure);
        }
        info!(target: ORCHESTRATOR_TARGET, app = id, "application updated");
        Outcome::Updated
    }

    pub(super) async fn supervise_run(self, id: String, handle: ProcessHandle) -> Outcome {
        let exit = handle
            .wait_with(|stream, line| self.publish_output(&id, Stage::Run, stream, line))
            .await;
        self.detach(&id);

        let mutation = match exit.into_result() {
            Ok(()) => Mutation::Keep,
            Err(_) if exit.cancelled => Mutation::Keep,
            Err(runner_error) => {
                Mutation::RecordError(LastError::from_runner(Stage::Run, &runner_error))
            }
        };
        info!(
            target: ORCHESTRATOR_TARGET,
            app = %id,
            code = ?exit.code,
            signal = ?exit.signal,
            cancelled = exit.cancelled,
            "application exited"
        );
        if let Err(state_error) = self.transition(&id, &[Phase::Running], Phase::Installed, mutation)
        {
            error!(target: ORCHESTRATOR_TARGET, app = %id, error = %state_error, "lost track of run");
        }
        Outcome::Exited(exit)
    }

    pub(super) async fn removal_pipeline(self, accepted: Transition) -> Outcome {
        let Transition { from, state, .. } = accepted;
        let id = state.id.as_str();
        if state.autostart_enabled {
            self.withdraw_autostart(id);
        }
        if let Err(error) = remove_directory(&state.install_path).await {
            let failure = LastError::new(
                Stage::Uninstall,
                FailureCause::filesystem("removing install directory", &error),
            );
            return self.fail(id, Phase::Removing, from, failure);
        }
        if let Err(failure) = self.step(id, Stage::Uninstall, Phase::Removing, Phase::NotInstalled) {
            return Outcome::Failed(failure);
        }
        info!(target: ORCHESTRATOR_TARGET, app = id, "application removed");
        Outcome::Removed
    }

    /// Records `failure` and moves `id` from `from` to `to`.
    pub(super) fn fail(&self, id: &str, from: Phase, to: Phase, failure: LastError) -> Outcome {
        warn!(
            target: ORCHESTRATOR_TARGET,
            app = id,
            stage = %failure.stage,
            cause = %failure.cause,
            phase = %to,
            "stage failed"
        );
        if let Err(error) =
            self.transition(id, &[from], to, Mutation::RecordError(failure.clone()))
        {
            error!(target: ORCHESTRATOR_TARGET, app = id, %error, "failed to record failure");
        }
        Outcome::Failed(failure)
    }

    /// Moves `id` between two phases owned by the current task.
    fn step(&self, id: &str, stage: Stage, from: Phase, to: Phase) -> Result<(), LastError> {
        self.transition(id, &[from], to, Mutation::Keep)
            .map(drop)
            .map_err(|error| {
                error!(target: ORCHESTRATOR_TARGET, app = id, %error, "pipeline lost ownership");
                LastError::new(
                    stage,
                    FailureCause::Interrupted {
                        message: error.to_string(),
                    },
                )
            })
    }

    fn stage_command(&self, spec: CommandSpec) -> CommandSpec {
        spec.with_timeout(self.inner.options.stage_timeout)
    }

    /// Runs `spec` to completion, publishing its output.
    ///
    /// Returns the last non-empty line written to standard output.
    async fn execute(
        &self,
        id: &str,
        stage: Stage,
        spec: &CommandSpec,
    ) -> Result<Option<String>, LastError> {
        let handle = self.inner.executor.spawn(spec).map_err(|error| {
            warn!(target: ORCHESTRATOR_TARGET, app = id, %stage, %error, "command did not start");
            LastError::from_runner(stage, &error)
        })?;
        self.attach(id, &handle);
        let mut last_line = None;
        let exit = handle
            .wait_with(|stream, line| {
                if stream == OutputStream::Stdout && !line.trim().is_empty() {
                    last_line = Some(line.trim().to_owned());
                }
                self.publish_output(id, stage, stream, line);
            })
            .await;
        self.detach(id);
        exit.into_result()
            .map(|()| last_line)
            .map_err(|error| LastError::from_runner(stage, &error))
    }

    async fn clone_checkout(&self, app: &AppDescriptor, path: &Path) -> Result<(), LastError> {
        let filesystem = |context: &str, error: &io::Error| {
            LastError::new(Stage::Clone, FailureCause::filesystem(context, error))
        };
        remove_directory(path)
            .await
            .map_err(|error| filesystem("removing stale install directory", &error))?;
        let parent = path.parent().unwrap_or(path);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| filesystem("creating download directory", &error))?;

        let git = &self.inner.options.git_program;
        let clone = git::clone(git, app.source_url(), path, parent).ok_or_else(|| {
            LastError::new(
                Stage::Clone,
                FailureCause::Filesystem {
                    message: format!("install path '{}' is not valid UTF-8", path.display()),
                },
            )
        })?;
        let spec = self.stage_command(clone);
        self.execute(app.id(), Stage::Clone, &spec).await?;
        if tokio::fs::metadata(path).await.is_ok_and(|metadata| metadata.is_dir()) {
            return Ok(());
        }
        Err(LastError::new(
            Stage::Clone,
            FailureCause::Filesystem {
                message: format!("clone did not create '{}'", path.display()),
            },
        ))
    }

    async fn discard_checkout(&self, id: &str, path: &Path) {
        if let Err(error) = remove_directory(path).await {
            warn!(
                target: ORCHESTRATOR_TARGET,
                app = id,
                path = %path.display(),
                %error,
                "failed to remove partial checkout"
            );
        }
    }

    /// Compares `HEAD` before and after a fast-forward pull.
    async fn pull_changes(&self, id: &str, checkout: &Path) -> Result<bool, LastError> {
        let git = &self.inner.options.git_program;
        let revision = self.stage_command(git::head_revision(git, checkout));
        let before = self.execute(id, Stage::Update, &revision).await?;
        self.execute(id, Stage::Update, &self.stage_command(git::pull(git, checkout)))
            .await?;
        let after = self.execute(id, Stage::Update, &revision).await?;
        info!(
            target: ORCHESTRATOR_TARGET,
            app = id,
            before = before.as_deref().unwrap_or("unknown"),
            after = after.as_deref().unwrap_or("unknown"),
            "compared revisions"
        );
        Ok(before != after)
    }

    /// Deregisters autostart ahead of removal; failures are logged and the
    /// removal continues.
    fn withdraw_autostart(&self, id: &str) {
        if let Err(error) = self.inner.registry.disable(id) {
            warn!(target: ORCHESTRATOR_TARGET, app = id, %error, "failed to remove autostart entry");
            return;
        }
        if let Err(error) = self.inner.store.set_autostart(id, false) {
            warn!(target: ORCHESTRATOR_TARGET, app = id, %error, "failed to record autostart removal");
        }
    }
}

/// Removes `path` recursively; a missing directory is not an error.
async fn remove_directory(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}
