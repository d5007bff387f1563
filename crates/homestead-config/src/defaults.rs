use std::env;
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Directory name used beneath the platform config and data directories.
pub const APP_DIRECTORY_NAME: &str = "homestead";

/// File name of the persisted settings document.
pub const SETTINGS_FILE: &str = "settings.json";

/// File name of the autostart ledger, stored beside the settings file.
pub const AUTOSTART_LEDGER_FILE: &str = "autostart.json";

/// Catalog file looked up in the working directory when none is given.
pub const DEFAULT_CATALOG_FILE: &str = "apps.json";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Owned log filter used as the serde default.
#[must_use]
pub fn default_log_filter_string() -> String {
    String::from(DEFAULT_LOG_FILTER)
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Applications run as soon as their install pipeline completes unless the
/// operator opts out.
#[must_use]
pub const fn default_run_after_install() -> bool {
    true
}

/// Settings file location in the platform config directory.
///
/// Hosts without one fall back to the temporary directory so the CLI still
/// starts.
#[must_use]
pub fn default_settings_path() -> PathBuf {
    let mut base = dirs::config_dir().unwrap_or_else(env::temp_dir);
    base.push(APP_DIRECTORY_NAME);
    base.push(SETTINGS_FILE);
    base
}

/// Default base directory that receives one subdirectory per application.
#[must_use]
pub fn default_download_directory() -> PathBuf {
    let mut base = dirs::data_dir().unwrap_or_else(env::temp_dir);
    base.push(APP_DIRECTORY_NAME);
    base.push("apps");
    base
}

/// Catalog path used when the operator does not pass `--catalog`.
#[must_use]
pub fn default_catalog_path() -> PathBuf {
    PathBuf::from(DEFAULT_CATALOG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_directory_is_absolute() {
        assert!(default_download_directory().is_absolute());
    }

    #[test]
    fn download_directory_is_namespaced() {
        let path = default_download_directory();
        assert!(path.ends_with("homestead/apps"), "unexpected path {path:?}");
    }

    #[test]
    fn settings_path_names_the_settings_file() {
        let path = default_settings_path();
        assert!(path.ends_with("homestead/settings.json"), "unexpected path {path:?}");
    }
}
