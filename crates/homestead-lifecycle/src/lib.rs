//! Lifecycle management for self-hosted applications.
//!
//! Homestead installs applications listed in a [`Catalog`] by cloning their
//! source repository into the download directory, runs their optional
//! install and setup commands, starts and stops them, pulls upstream
//! updates and registers them to start with the user's session.
//!
//! The pieces fit together as follows:
//!
//! - [`Catalog`] validates the descriptor document and is immutable after
//!   loading.
//! - [`StateStore`] owns one [`LifecycleState`] per application and guards
//!   every phase change with a compare-and-set.
//! - [`CommandExecutor`] starts commands and streams their output;
//!   [`ProcessExecutor`] is the real implementation.
//! - [`AutostartRegistry`] hides the host's session startup mechanism.
//! - [`Orchestrator`] combines them into the install, update, run,
//!   autostart and uninstall operations, publishing [`LifecycleEvent`]s as
//!   work progresses.

pub mod autostart;
pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod state;

pub use autostart::{AutostartRegistry, DesktopEntryRegistry};
pub use catalog::{AppDescriptor, Catalog};
pub use error::{
    CatalogError, FailureCause, OrchestratorError, PersistError, RegistryError, RunnerError,
    StateError,
};
pub use orchestrator::{
    LifecycleEvent, Operation, Orchestrator, OrchestratorOptions, Outcome, PendingOperation,
};
pub use runner::{
    CommandExecutor, CommandSpec, OutputStream, ProcessCanceller, ProcessEvent, ProcessExecutor,
    ProcessExit, ProcessHandle,
};
pub use state::{
    AutostartLedger, LastError, LifecycleState, Mutation, Phase, Stage, StateStore, Transition,
};

#[cfg(test)]
mod tests;
