//! Invocation options layered by `ortho_config`.
//!
//! Values are merged from lowest to highest precedence: built-in defaults, a
//! `.homestead.toml` file (or the file named by `--config-path` /
//! `HOMESTEAD_CONFIG_PATH`), `HOMESTEAD_*` environment variables, then
//! command-line flags.

use std::path::PathBuf;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_LOG_FILTER, default_catalog_path, default_log_filter_string, default_log_format,
    default_settings_path,
};
use crate::logging::LogFormat;
use crate::settings::SettingsStore;

/// Where Homestead finds its files and how it logs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "HOMESTEAD")]
pub struct Config {
    /// Settings document; the platform config directory when unset.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    /// Catalog document; `apps.json` in the working directory when unset.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    /// `EnvFilter` expression for the tracing subscriber.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for the tracing subscriber.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: None,
            catalog: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Resolved settings document location.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(default_settings_path)
    }

    /// Store for the resolved settings document.
    #[must_use]
    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(self.settings_path())
    }

    /// Resolved catalog location.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog.clone().unwrap_or_else(default_catalog_path)
    }

    /// Log filter expression; blank values fall back to the default.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        match self.log_filter.trim() {
            "" => DEFAULT_LOG_FILTER,
            filter => filter,
        }
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
