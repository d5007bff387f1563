//! Lifecycle phases and pipeline stages.

use std::fmt;

use serde::Serialize;

/// Position of an application in its lifecycle state machine.
///
/// `Cloning`, `Installing`, `Setup`, `Updating`, `Running` and `Removing` are
/// in-flight phases owned by exactly one orchestrator task; the remaining
/// phases are at rest and accept new operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No install directory exists.
    NotInstalled,
    /// The source repository is being cloned.
    Cloning,
    /// The install command is running.
    Installing,
    /// The setup command is running.
    Setup,
    /// Installed and idle.
    Installed,
    /// The start command is running.
    Running,
    /// The checkout is being updated.
    Updating,
    /// The install command failed; re-install to retry.
    InstallFailed,
    /// The setup command failed; re-install to retry.
    SetupFailed,
    /// The install directory is being removed.
    Removing,
}

impl Phase {
    /// Phases from which `install` may start.
    pub const INSTALLABLE: &'static [Self] =
        &[Self::NotInstalled, Self::InstallFailed, Self::SetupFailed];

    /// Phases from which `uninstall` may start.
    pub const REMOVABLE: &'static [Self] =
        &[Self::Installed, Self::InstallFailed, Self::SetupFailed];

    /// Phases in which the autostart registration may change.
    pub const AUTOSTART_EDITABLE: &'static [Self] = &[Self::Installed, Self::Running];

    /// Human-readable name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInstalled => "not installed",
            Self::Cloning => "cloning",
            Self::Installing => "installing",
            Self::Setup => "setting up",
            Self::Installed => "installed",
            Self::Running => "running",
            Self::Updating => "updating",
            Self::InstallFailed => "install failed",
            Self::SetupFailed => "setup failed",
            Self::Removing => "removing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step that produced output or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// `git clone` of the source repository.
    Clone,
    /// The descriptor's install command.
    Install,
    /// The descriptor's setup command.
    Setup,
    /// The descriptor's start command.
    Run,
    /// Revision checks and `git pull`.
    Update,
    /// Removal of the install directory.
    Uninstall,
}

impl Stage {
    /// Lower-case stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Install => "install",
            Self::Setup => "setup",
            Self::Run => "run",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
