//! Progress notifications for observers.

use crate::runner::OutputStream;
use crate::state::{Phase, Stage};

/// Number of events buffered for slow subscribers before they start
/// missing events.
pub const EVENT_CAPACITY: usize = 1024;

/// Notification published while operations execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An application changed phase.
    PhaseChanged {
        /// Application identifier.
        app_id: String,
        /// Phase that was left.
        from: Phase,
        /// Phase that was entered.
        to: Phase,
    },
    /// A stage command produced a line of output.
    Output {
        /// Application identifier.
        app_id: String,
        /// Stage that produced the line.
        stage: Stage,
        /// Stream the line was read from.
        stream: OutputStream,
        /// The line, without its terminator.
        line: String,
    },
}

impl LifecycleEvent {
    /// Application the event concerns.
    #[must_use]
    pub fn app_id(&self) -> &str {
        match self {
            Self::PhaseChanged { app_id, .. } | Self::Output { app_id, .. } => app_id,
        }
    }
}
