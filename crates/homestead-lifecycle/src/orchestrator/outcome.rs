//! Accepted operations and their results.

use std::fmt;

use tokio::task::JoinHandle;
use tracing::error;

use super::ORCHESTRATOR_TARGET;
use crate::error::FailureCause;
use crate::runner::ProcessExit;
use crate::state::{LastError, Stage};

/// Operations the orchestrator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Clone, install dependencies and set up.
    Install,
    /// Pull upstream changes and re-run setup when they arrive.
    Update,
    /// Start the application.
    Run,
    /// Stop a running application.
    CancelRun,
    /// Register with session startup.
    EnableAutostart,
    /// Deregister from session startup.
    DisableAutostart,
    /// Remove the install directory.
    Uninstall,
}

impl Operation {
    /// Verb phrase used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Run => "run",
            Self::CancelRun => "cancel",
            Self::EnableAutostart => "enable autostart for",
            Self::DisableAutostart => "disable autostart for",
            Self::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of an accepted operation.
#[derive(Debug)]
pub enum Outcome {
    /// The install pipeline completed.
    Installed {
        /// Run started because run-after-install is enabled.
        run: Option<PendingOperation>,
    },
    /// The update brought in changes.
    Updated,
    /// The update found nothing new.
    UpToDate,
    /// The started application exited.
    Exited(ProcessExit),
    /// The install directory was removed.
    Removed,
    /// A stage failed; the same record is stored as the last error.
    Failed(LastError),
}

impl Outcome {
    /// Returns `true` unless a stage failed or the application exited
    /// abnormally without being asked to stop.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Failed(_) => false,
            Self::Exited(exit) => exit.is_success() || exit.cancelled,
            Self::Installed { .. } | Self::Updated | Self::UpToDate | Self::Removed => true,
        }
    }
}

/// An operation running in the background.
#[derive(Debug)]
pub struct PendingOperation {
    app_id: String,
    operation: Operation,
    stage: Stage,
    task: JoinHandle<Outcome>,
}

impl PendingOperation {
    pub(super) const fn new(
        app_id: String,
        operation: Operation,
        stage: Stage,
        task: JoinHandle<Outcome>,
    ) -> Self {
        Self {
            app_id,
            operation,
            stage,
            task,
        }
    }

    /// Application the operation targets.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The accepted operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns `true` once the outcome is available.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the outcome.
    ///
    /// A task that panicked is reported as an interrupted failure of the
    /// operation's first stage.
    pub async fn wait(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(
                    target: ORCHESTRATOR_TARGET,
                    app = %self.app_id,
                    operation = %self.operation,
                    error = %join_error,
                    "operation task ended abnormally"
                );
                Outcome::Failed(LastError::new(
                    self.stage,
                    FailureCause::Interrupted {
                        message: join_error.to_string(),
                    },
                ))
            }
        }
    }
}
