//! Persisted operator settings.
//!
//! [`Settings`] is the durable record of where applications are downloaded
//! and whether a successful install chains straight into `run`. The
//! [`SettingsStore`] reads and writes it; a missing file yields the defaults
//! so a first run needs no interactive setup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{
    AUTOSTART_LEDGER_FILE, default_download_directory, default_run_after_install,
    default_settings_path,
};
use crate::persist::write_json_atomically;

/// Operator settings shared by the state store and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Absolute base directory; each application installs into
    /// `download_directory/<id>`.
    #[serde(default = "default_download_directory")]
    pub download_directory: PathBuf,
    /// Chains a successful install into `run`.
    #[serde(default = "default_run_after_install")]
    pub run_after_install: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_directory: default_download_directory(),
            run_after_install: default_run_after_install(),
        }
    }
}

impl Settings {
    /// Builds settings from explicit values.
    #[must_use]
    pub fn new(download_directory: impl Into<PathBuf>, run_after_install: bool) -> Self {
        Self {
            download_directory: download_directory.into(),
            run_after_install,
        }
    }

    /// Rejects settings that cannot be used to derive install paths.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::RelativeDownloadDirectory`] when the download
    /// directory is not absolute.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.download_directory.is_absolute() {
            return Err(SettingsError::RelativeDownloadDirectory {
                path: self.download_directory.clone(),
            });
        }
        Ok(())
    }

    /// Validates the settings and creates the download directory if missing.
    ///
    /// # Errors
    ///
    /// Returns a validation error or [`SettingsError::CreateDownloadDirectory`]
    /// when the directory cannot be created.
    pub fn prepare_download_directory(&self) -> Result<&Path, SettingsError> {
        self.validate()?;
        fs::create_dir_all(&self.download_directory).map_err(|source| {
            SettingsError::CreateDownloadDirectory {
                path: self.download_directory.clone(),
                source: Arc::new(source),
            }
        })?;
        Ok(self.download_directory.as_path())
    }

    /// Applies the populated fields of `update`, returning `true` when any
    /// value changed.
    pub fn apply(&mut self, update: SettingsUpdate) -> bool {
        let mut changed = false;
        if let Some(directory) = update.download_directory
            && directory != self.download_directory
        {
            self.download_directory = directory;
            changed = true;
        }
        if let Some(policy) = update.run_after_install
            && policy != self.run_after_install
        {
            self.run_after_install = policy;
            changed = true;
        }
        changed
    }
}

/// Partial update issued by the settings operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// New download directory, when changing it.
    pub download_directory: Option<PathBuf>,
    /// New run-after-install policy, when changing it.
    pub run_after_install: Option<bool>,
}

impl SettingsUpdate {
    /// Returns `true` when the update carries no values.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.download_directory.is_none() && self.run_after_install.is_none()
    }
}

/// Errors raised while reading or writing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The settings file is not valid JSON for [`Settings`].
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// Writing the settings file failed.
    #[error("failed to write settings file '{path}': {source}")]
    Write {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The configured download directory is relative.
    #[error("download directory '{path}' must be an absolute path")]
    RelativeDownloadDirectory {
        /// Offending path.
        path: PathBuf,
    },
    /// The download directory could not be created.
    #[error("failed to create download directory '{path}': {source}")]
    CreateDownloadDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Reads and writes the settings document at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the default location (see
    /// [`default_settings_path`]).
    #[must_use]
    pub fn at_default_location() -> Self {
        Self::new(default_settings_path())
    }

    /// Path of the settings document.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Path of the autostart ledger kept beside the settings document.
    #[must_use]
    pub fn autostart_ledger_path(&self) -> PathBuf {
        self.path.with_file_name(AUTOSTART_LEDGER_FILE)
    }

    /// Loads settings, returning the defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] or [`SettingsError::Parse`] when the
    /// file exists but is unreadable or malformed, and a validation error
    /// when the stored download directory is relative.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(error) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source: Arc::new(error),
                });
            }
        };
        let settings: Settings =
            serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source: Arc::new(source),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates and atomically writes `settings`.
    ///
    /// # Errors
    ///
    /// Returns a validation error or [`SettingsError::Write`].
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        write_json_atomically(&self.path, settings).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source: Arc::new(source),
        })
    }

    /// Loads, applies `update`, and saves when anything changed.
    ///
    /// Returns the resulting settings and whether the file was rewritten.
    ///
    /// # Errors
    ///
    /// Propagates [`SettingsStore::load`] and [`SettingsStore::save`] errors.
    pub fn update(&self, update: SettingsUpdate) -> Result<(Settings, bool), SettingsError> {
        let mut settings = self.load()?;
        let changed = settings.apply(update);
        if changed {
            self.save(&settings)?;
        }
        Ok((settings, changed))
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::at_default_location()
    }
}
