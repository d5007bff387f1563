//! Spawning and supervision of external commands.
//!
//! A [`CommandExecutor`] turns a [`CommandSpec`] into a [`ProcessHandle`]
//! without waiting for the command: the child runs under a supervising Tokio
//! task that forwards its output line by line and finally reports a single
//! [`ProcessEvent::Exited`]. The production implementation is
//! [`ProcessExecutor`]; tests substitute executors that script their events.

mod process;

use std::fmt;
use std::future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::RunnerError;

pub use self::process::{KILL_GRACE_PERIOD, ProcessExecutor};

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A line interpreted by the platform shell.
    Shell(String),
    /// A program and its arguments, executed without a shell.
    Argv {
        /// Program name or path.
        program: String,
        /// Arguments passed verbatim.
        args: Vec<String>,
    },
}

/// A command together with where and how long it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    line: CommandLine,
    working_dir: PathBuf,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Runs `line` through the platform shell in `working_dir`.
    #[must_use]
    pub fn shell(line: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            line: CommandLine::Shell(line.into()),
            working_dir: working_dir.into(),
            timeout: None,
        }
    }

    /// Runs `program` with `args` in `working_dir`.
    #[must_use]
    pub fn program<I, S>(
        program: impl Into<String>,
        args: I,
        working_dir: impl Into<PathBuf>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            line: CommandLine::Argv {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            working_dir: working_dir.into(),
            timeout: None,
        }
    }

    /// Terminates the command once `timeout` elapses.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command to execute.
    #[must_use]
    pub const fn line(&self) -> &CommandLine {
        &self.line
    }

    /// Working directory of the child.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Arguments of an argv command; empty for shell lines.
    #[must_use]
    pub fn args(&self) -> &[String] {
        match &self.line {
            CommandLine::Shell(_) => &[],
            CommandLine::Argv { args, .. } => args,
        }
    }

    /// Returns `true` when there is nothing to execute.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        match &self.line {
            CommandLine::Shell(line) => line.trim().is_empty(),
            CommandLine::Argv { program, .. } => program.trim().is_empty(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.line {
            CommandLine::Shell(line) => f.write_str(line),
            CommandLine::Argv { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// Abstracts command execution for testability.
///
/// Implementations must return as soon as the command has been started and
/// must deliver exactly one [`ProcessEvent::Exited`] through the handle,
/// after all of the command's output.
pub trait CommandExecutor: Send + Sync {
    /// Starts `spec` and returns a handle to its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] when the command cannot be started and
    /// [`RunnerError::NoRuntime`] when called outside a Tokio runtime.
    fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle, RunnerError>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for Arc<E> {
    fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle, RunnerError> {
        (**self).spawn(spec)
    }
}

/// Output channel of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Event reported by a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of standard output, without its terminator.
    Stdout(String),
    /// One line of standard error, without its terminator.
    Stderr(String),
    /// The command finished. Always the last event.
    Exited(ProcessExit),
}

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessExit {
    /// Exit status, when the command exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when the command was killed.
    pub signal: Option<i32>,
    /// `true` when the command was stopped through its canceller.
    pub cancelled: bool,
    /// `true` when the command was stopped because its timeout elapsed.
    pub timed_out: bool,
}

impl ProcessExit {
    /// A normal exit with `code`.
    #[must_use]
    pub const fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
            cancelled: false,
            timed_out: false,
        }
    }

    /// A successful exit.
    #[must_use]
    pub const fn success() -> Self {
        Self::with_code(0)
    }

    /// Returns `true` for exit status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Classifies the exit.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::CommandCancelled`] when the command was
    /// cancelled, timed out or killed by a signal,
    /// [`RunnerError::CommandFailed`] for a non-zero status, and
    /// [`RunnerError::Lost`] when neither a status nor a signal is known.
    pub const fn into_result(self) -> Result<(), RunnerError> {
        if self.cancelled || self.timed_out || self.signal.is_some() {
            return Err(RunnerError::CommandCancelled {
                signal: self.signal,
                timed_out: self.timed_out,
            });
        }
        match self.code {
            Some(0) => Ok(()),
            Some(code) => Err(RunnerError::CommandFailed { code }),
            None => Err(RunnerError::Lost),
        }
    }
}

/// Requests cancellation of a running command.
///
/// Clones share one flag; cancelling is idempotent and safe after the
/// command has finished.
#[derive(Debug, Clone)]
pub struct ProcessCanceller {
    sender: Arc<watch::Sender<bool>>,
}

impl ProcessCanceller {
    /// Creates a canceller and the signal its supervisor listens on.
    #[must_use]
    pub fn new() -> (Self, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            CancelSignal { receiver },
        )
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Supervisor side of a [`ProcessCanceller`].
#[derive(Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Resolves once cancellation is requested.
    ///
    /// Never resolves if every canceller is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.receiver.wait_for(|requested| *requested).await.is_err() {
            future::pending::<()>().await;
        }
    }
}

/// Handle to a started command.
#[derive(Debug)]
pub struct ProcessHandle {
    process_id: Option<u32>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    canceller: ProcessCanceller,
    finished: bool,
}

impl ProcessHandle {
    /// Assembles a handle from the parts an executor produces.
    #[must_use]
    pub const fn new(
        process_id: Option<u32>,
        events: mpsc::UnboundedReceiver<ProcessEvent>,
        canceller: ProcessCanceller,
    ) -> Self {
        Self {
            process_id,
            events,
            canceller,
            finished: false,
        }
    }

    /// A handle whose command has already finished with `exit`.
    #[must_use]
    pub fn finished(exit: ProcessExit) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        drop(sender.send(ProcessEvent::Exited(exit)));
        let (canceller, _signal) = ProcessCanceller::new();
        Self::new(None, events, canceller)
    }

    /// Operating system id of the child, when known.
    #[must_use]
    pub const fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// A canceller for this command.
    #[must_use]
    pub fn canceller(&self) -> ProcessCanceller {
        self.canceller.clone()
    }

    /// Requests cancellation; see [`ProcessCanceller::cancel`].
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Receives the next event, or `None` after the exit event.
    ///
    /// A supervisor that disappears without reporting an exit yields a
    /// synthetic exit with neither status nor signal.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        if self.finished {
            return None;
        }
        let event = self
            .events
            .recv()
            .await
            .unwrap_or(ProcessEvent::Exited(ProcessExit::default()));
        if matches!(event, ProcessEvent::Exited(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Waits for the command to finish, handing each output line to
    /// `on_output`.
    pub async fn wait_with<F>(mut self, mut on_output: F) -> ProcessExit
    where
        F: FnMut(OutputStream, String),
    {
        while let Some(event) = self.next_event().await {
            match event {
                ProcessEvent::Stdout(line) => on_output(OutputStream::Stdout, line),
                ProcessEvent::Stderr(line) => on_output(OutputStream::Stderr, line),
                ProcessEvent::Exited(exit) => return exit,
            }
        }
        ProcessExit::default()
    }

    /// Waits for the command to finish, discarding its output.
    pub async fn wait(self) -> ProcessExit {
        self.wait_with(|_, _| {}).await
    }
}

#[cfg(test)]
mod tests;
