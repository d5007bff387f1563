//! Configuration loading for the CLI.
//!
//! Global flags are parsed by clap so they may appear anywhere on the command
//! line; the values given are then handed to `ortho_config`, which layers
//! them over defaults, the configuration file and `HOMESTEAD_*` variables.

use std::ffi::OsString;

use homestead_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

pub(crate) trait ConfigLoader {
    /// Loads configuration from the re-rendered global flags.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}
