//! Shared configuration for the Homestead workspace.
//!
//! The crate owns the persisted operator settings (download directory and the
//! run-after-install policy), the layered invocation [`Config`] consumed by
//! the CLI, and the default locations of every durable file Homestead
//! writes. Values are plain data passed to constructors; nothing here is a
//! process-wide mutable singleton.
//!
//! Settings live in a JSON document so the file written by `settings set` can
//! be inspected or edited by hand:
//!
//! ```json
//! { "downloadDirectory": "/srv/apps", "runAfterInstall": true }
//! ```

mod config;
mod defaults;
mod logging;
mod persist;
mod settings;

pub use config::Config;
pub use defaults::{
    APP_DIRECTORY_NAME, AUTOSTART_LEDGER_FILE, DEFAULT_CATALOG_FILE, DEFAULT_LOG_FILTER,
    SETTINGS_FILE, default_catalog_path, default_download_directory, default_log_filter_string,
    default_log_format, default_run_after_install, default_settings_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use ortho_config::OrthoError;
pub use persist::write_json_atomically;
pub use settings::{Settings, SettingsError, SettingsStore, SettingsUpdate};
