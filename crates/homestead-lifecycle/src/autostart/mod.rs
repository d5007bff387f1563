//! Registration of applications with the host's session startup.
//!
//! The orchestrator only sees the narrow [`AutostartRegistry`] capability.
//! [`DesktopEntryRegistry`] implements it with freedesktop autostart entries,
//! one `homestead-<id>.desktop` file per application.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::RegistryError;

/// Tracing target for autostart registration.
const AUTOSTART_TARGET: &str = "homestead_lifecycle::autostart";

/// Prefix of every entry file written by [`DesktopEntryRegistry`].
pub const ENTRY_PREFIX: &str = "homestead-";

/// Host startup mechanism.
#[cfg_attr(test, mockall::automock)]
pub trait AutostartRegistry: Send + Sync {
    /// Registers `command` to run in `working_directory` at session start.
    ///
    /// Enabling an already registered application replaces its entry.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the registration cannot be stored.
    fn enable(
        &self,
        app_id: &str,
        command: &str,
        working_directory: &Path,
    ) -> Result<(), RegistryError>;

    /// Removes the registration for `app_id`. Removing a missing
    /// registration succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when an existing registration cannot be
    /// removed.
    fn disable(&self, app_id: &str) -> Result<(), RegistryError>;
}

impl<R: AutostartRegistry + ?Sized> AutostartRegistry for Arc<R> {
    fn enable(
        &self,
        app_id: &str,
        command: &str,
        working_directory: &Path,
    ) -> Result<(), RegistryError> {
        (**self).enable(app_id, command, working_directory)
    }

    fn disable(&self, app_id: &str) -> Result<(), RegistryError> {
        (**self).disable(app_id)
    }
}

/// Writes freedesktop `.desktop` autostart entries into a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntryRegistry {
    directory: PathBuf,
}

impl DesktopEntryRegistry {
    /// Uses `directory` for entries.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Uses the current user's `autostart` directory under the platform
    /// config directory (`$XDG_CONFIG_HOME/autostart` on Linux).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the platform reports no
    /// config directory.
    pub fn for_current_user() -> Result<Self, RegistryError> {
        dirs::config_dir()
            .map(|config| Self::new(config.join("autostart")))
            .ok_or(RegistryError::Unavailable)
    }

    /// Directory receiving the entries.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the entry for `app_id`.
    #[must_use]
    pub fn entry_path(&self, app_id: &str) -> PathBuf {
        self.directory.join(format!("{ENTRY_PREFIX}{app_id}.desktop"))
    }
}

impl AutostartRegistry for DesktopEntryRegistry {
    fn enable(
        &self,
        app_id: &str,
        command: &str,
        working_directory: &Path,
    ) -> Result<(), RegistryError> {
        let path = self.entry_path(app_id);
        let write_error = |source: io::Error| RegistryError::Write {
            path: path.clone(),
            source: Arc::new(source),
        };
        fs::create_dir_all(&self.directory).map_err(write_error)?;
        fs::write(&path, render_entry(app_id, command, working_directory)).map_err(write_error)?;
        info!(
            target: AUTOSTART_TARGET,
            app = app_id,
            entry = %path.display(),
            "autostart entry written"
        );
        Ok(())
    }

    fn disable(&self, app_id: &str) -> Result<(), RegistryError> {
        let path = self.entry_path(app_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(
                    target: AUTOSTART_TARGET,
                    app = app_id,
                    entry = %path.display(),
                    "autostart entry removed"
                );
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(target: AUTOSTART_TARGET, app = app_id, "no autostart entry to remove");
                Ok(())
            }
            Err(error) => Err(RegistryError::Remove {
                path,
                source: Arc::new(error),
            }),
        }
    }
}

/// Renders the desktop entry that starts `command` inside
/// `working_directory`.
fn render_entry(app_id: &str, command: &str, working_directory: &Path) -> String {
    let script = format!(
        "cd {} && {command}",
        shell_quote(&working_directory.display().to_string())
    );
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=Homestead: {app_id}\n\
         Comment=Started by homestead\n\
         Exec=sh -c {}\n\
         Path={}\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n",
        exec_quote(&script),
        escape_value(&working_directory.display().to_string()),
    )
}

/// Single-quotes `text` for `sh`.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Quotes one `Exec` argument.
///
/// Inside a quoted argument `"`, `` ` ``, `$` and `\` need a backslash; the
/// key file format then escapes every backslash again and `%` doubles to
/// stay clear of field codes.
fn exec_quote(argument: &str) -> String {
    let mut quoted = String::with_capacity(argument.len() + 2);
    quoted.push('"');
    for character in argument.chars() {
        if matches!(character, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(character);
    }
    quoted.push('"');
    escape_value(&quoted).replace('%', "%%")
}

/// Escapes a key file string value.
fn escape_value(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('\n', r"\n")
        .replace('\t', r"\t")
}
