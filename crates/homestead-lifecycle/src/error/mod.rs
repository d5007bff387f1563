//! Domain errors raised by the lifecycle components.
//!
//! Each component owns a `thiserror`-derived enum carrying structured context
//! so callers can inspect failures programmatically. I/O and JSON errors are
//! wrapped in `Arc` to satisfy the `result_large_err` Clippy lint and to keep
//! the errors cheap to clone into failure records.
//!
//! [`FailureCause`] is the persisted half of the taxonomy: pipeline stages
//! reduce whatever went wrong to one of its variants before recording it as
//! the application's last error.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::orchestrator::Operation;
use crate::state::Phase;

/// Errors raised while loading and validating the application catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog '{path}': {source}")]
    Read {
        /// Catalog file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The catalog document is not valid JSON.
    #[error("failed to parse catalog: {source}")]
    Parse {
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A descriptor omits a required field.
    #[error("catalog entry {index} is missing required field '{field}'")]
    MissingField {
        /// Zero-based position of the descriptor in the catalog.
        index: usize,
        /// Name of the missing field as written in the document.
        field: &'static str,
    },

    /// A descriptor identifier cannot name an install directory.
    #[error("catalog entry {index} has invalid id '{id}': {reason}")]
    InvalidId {
        /// Zero-based position of the descriptor in the catalog.
        index: usize,
        /// Offending identifier.
        id: String,
        /// Why the identifier was refused.
        reason: &'static str,
    },

    /// Two descriptors share an identifier.
    #[error("catalog declares application '{id}' more than once")]
    DuplicateId {
        /// Repeated identifier.
        id: String,
    },
}

/// Errors raised by the state store.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// No state entry exists for the identifier.
    #[error("application '{id}' is not in the catalog")]
    UnknownApp {
        /// Identifier that was looked up.
        id: String,
    },

    /// A compare-and-set transition found a different phase than expected.
    #[error("application '{id}' is {actual}, expected one of {expected:?}")]
    Conflict {
        /// Application identifier.
        id: String,
        /// Phases the caller was prepared to leave.
        expected: Vec<Phase>,
        /// Phase actually observed.
        actual: Phase,
    },

    /// The autostart ledger could not be read or written.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors raised while reading or writing the autostart ledger.
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    /// The ledger exists but could not be read.
    #[error("failed to read autostart ledger '{path}': {source}")]
    Read {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The ledger is not a JSON object of booleans.
    #[error("failed to parse autostart ledger '{path}': {source}")]
    Parse {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The ledger could not be written.
    #[error("failed to write autostart ledger '{path}': {source}")]
    Write {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Errors raised while spawning or supervising a command.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// The command could not be started.
    #[error("failed to start '{command}': {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Commands can only be supervised from within a Tokio runtime.
    #[error("no Tokio runtime is available to supervise '{command}'")]
    NoRuntime {
        /// Rendered command line.
        command: String,
    },

    /// The command exited with a non-zero status.
    #[error("command exited with status {code}")]
    CommandFailed {
        /// Exit status reported by the operating system.
        code: i32,
    },

    /// The command was terminated by a signal, a cancellation, or a timeout.
    #[error("command cancelled (signal {signal:?}, timed out: {timed_out})")]
    CommandCancelled {
        /// Terminating signal, when the platform reports one.
        signal: Option<i32>,
        /// `true` when the runner terminated the command after its timeout.
        timed_out: bool,
    },

    /// Supervision ended without an exit status.
    #[error("command supervision ended without an exit status")]
    Lost,
}

/// Errors raised by an autostart registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The platform offers no per-user autostart location.
    #[error("no autostart directory is available on this host")]
    Unavailable,

    /// The startup entry could not be written.
    #[error("failed to write autostart entry '{path}': {source}")]
    Write {
        /// Entry path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The startup entry could not be removed.
    #[error("failed to remove autostart entry '{path}': {source}")]
    Remove {
        /// Entry path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Errors returned synchronously when an orchestrator operation is refused.
///
/// Failures that happen after an operation has been accepted are reported
/// through its [`Outcome`](crate::orchestrator::Outcome) and recorded on the
/// application's state instead.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// The identifier is not in the catalog.
    #[error("application '{id}' is not in the catalog")]
    UnknownApp {
        /// Identifier that was requested.
        id: String,
    },

    /// The application's current phase does not permit the operation.
    #[error("cannot {operation} '{id}' while it is {phase}")]
    OperationRejected {
        /// Application identifier.
        id: String,
        /// Operation that was refused.
        operation: Operation,
        /// Phase observed when the request was made.
        phase: Phase,
    },

    /// The autostart registry refused the change.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Persisting state failed.
    #[error(transparent)]
    State(StateError),

    /// Operations spawn background tasks and need a Tokio runtime.
    #[error("the orchestrator must be created inside a Tokio runtime")]
    NoRuntime,
}

/// Reason a stage failed, as recorded on the application's state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// The stage command exited with a non-zero status.
    #[error("command exited with status {code}")]
    CommandFailed {
        /// Exit status.
        code: i32,
    },

    /// The stage command was terminated by a signal, cancellation, or timeout.
    #[error("command cancelled (signal {signal:?}, timed out: {timed_out})")]
    CommandCancelled {
        /// Terminating signal, when known.
        signal: Option<i32>,
        /// `true` when the stage exceeded its timeout.
        timed_out: bool,
    },

    /// A filesystem operation around the stage failed, including failing to
    /// start the command.
    #[error("filesystem error: {message}")]
    Filesystem {
        /// Human-readable description.
        message: String,
    },

    /// The stage stopped without a definitive result.
    #[error("interrupted: {message}")]
    Interrupted {
        /// Human-readable description.
        message: String,
    },
}

impl FailureCause {
    /// Wraps an I/O error raised around a stage.
    #[must_use]
    pub fn filesystem(context: &str, error: &io::Error) -> Self {
        Self::Filesystem {
            message: format!("{context}: {error}"),
        }
    }
}

impl From<&RunnerError> for FailureCause {
    fn from(error: &RunnerError) -> Self {
        match *error {
            RunnerError::CommandFailed { code } => Self::CommandFailed { code },
            RunnerError::CommandCancelled { signal, timed_out } => {
                Self::CommandCancelled { signal, timed_out }
            }
            RunnerError::Spawn { .. } => Self::Filesystem {
                message: error.to_string(),
            },
            RunnerError::NoRuntime { .. } | RunnerError::Lost => Self::Interrupted {
                message: error.to_string(),
            },
        }
    }
}
