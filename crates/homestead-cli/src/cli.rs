//! CLI argument definitions.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use homestead_config::LogFormat;

/// Command-line interface for the Homestead application manager.
#[derive(Parser, Debug)]
#[command(
    name = "homestead",
    version,
    about = "Installs, runs and updates self-hosted applications",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// TOML file layered beneath environment variables and flags.
    #[arg(long, value_name = "PATH", global = true)]
    pub(crate) config_path: Option<PathBuf>,
    /// Settings file to use instead of the platform default.
    #[arg(long, value_name = "PATH", global = true)]
    pub(crate) settings_path: Option<PathBuf>,
    /// Catalog document describing the available applications.
    #[arg(long, value_name = "PATH", global = true)]
    pub(crate) catalog: Option<PathBuf>,
    /// Tracing filter expression (for example `homestead_lifecycle=debug`).
    #[arg(long, value_name = "FILTER", global = true)]
    pub(crate) log_filter: Option<String>,
    /// Log output format: `json` or `compact`.
    #[arg(long, value_name = "FORMAT", global = true)]
    pub(crate) log_format: Option<LogFormat>,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    /// Re-renders the global options as flags for the configuration loader.
    ///
    /// Only options given on the command line are emitted, so environment
    /// and file values survive when a flag is absent.
    pub(crate) fn config_arguments(&self) -> Vec<OsString> {
        let mut arguments = vec![OsString::from("homestead")];
        let paths = [
            ("--config-path", self.config_path.as_ref()),
            ("--settings-path", self.settings_path.as_ref()),
            ("--catalog", self.catalog.as_ref()),
        ];
        for (flag, value) in paths {
            if let Some(path) = value {
                arguments.extend([OsString::from(flag), path.clone().into_os_string()]);
            }
        }
        if let Some(filter) = &self.log_filter {
            arguments.extend([OsString::from("--log-filter"), OsString::from(filter)]);
        }
        if let Some(format) = self.log_format {
            arguments.extend([
                OsString::from("--log-format"),
                OsString::from(format.to_string()),
            ]);
        }
        arguments
    }
}

/// Top-level operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Lists every catalog application with its phase.
    List,
    /// Shows the state of one application.
    Status {
        /// Application identifier.
        id: String,
    },
    /// Clones an application and runs its install and setup commands.
    Install {
        /// Application identifier.
        id: String,
    },
    /// Pulls upstream changes and re-runs setup when they arrive.
    Update {
        /// Application identifier.
        id: String,
    },
    /// Starts an application and streams its output until it exits.
    Run {
        /// Application identifier.
        id: String,
    },
    /// Manages session autostart registration.
    Autostart {
        /// Registration change.
        #[command(subcommand)]
        action: AutostartAction,
    },
    /// Removes an application's install directory.
    Uninstall {
        /// Application identifier.
        id: String,
    },
    /// Uninstalls every installed application.
    Clear,
    /// Shows or changes persisted settings.
    Settings {
        /// Settings action.
        #[command(subcommand)]
        action: SettingsAction,
    },
}

/// Autostart registration changes.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum AutostartAction {
    /// Starts the application with the user's session.
    Enable {
        /// Application identifier.
        id: String,
    },
    /// Stops starting the application with the session.
    Disable {
        /// Application identifier.
        id: String,
    },
}

/// Settings actions.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum SettingsAction {
    /// Prints the effective settings as JSON.
    Show,
    /// Updates one or more settings.
    Set {
        /// Absolute directory receiving one checkout per application.
        #[arg(long, value_name = "PATH")]
        download_directory: Option<PathBuf>,
        /// Start applications once their install completes.
        #[arg(long, value_name = "BOOL")]
        run_after_install: Option<bool>,
    },
}
