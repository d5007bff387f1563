//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use homestead_config::{OrthoError, SettingsError};
use homestead_lifecycle::{CatalogError, OrchestratorError, PersistError, RegistryError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Ledger(#[from] PersistError),
    #[error("autostart is unavailable: {0}")]
    Registry(RegistryError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("settings set needs --download-directory or --run-after-install")]
    EmptySettingsUpdate,
    #[error("failed to render settings: {0}")]
    RenderSettings(serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}
