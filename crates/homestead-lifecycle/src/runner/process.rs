//! Process-based command execution on Tokio.
//!
//! [`ProcessExecutor`] implements [`CommandExecutor`] by spawning the command
//! in its own process group with piped output, then handing the child to a
//! supervising task. The supervisor waits for whichever comes first of the
//! child exiting, a cancellation request, or the timeout. Cancellation and
//! timeouts send `SIGTERM` to the whole group and escalate to `SIGKILL` after
//! [`KILL_GRACE_PERIOD`].

use std::future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    CancelSignal, CommandExecutor, CommandLine, CommandSpec, ProcessCanceller, ProcessEvent,
    ProcessExit, ProcessHandle,
};
use crate::error::RunnerError;

/// Tracing target for process supervision.
const PROCESS_TARGET: &str = "homestead_lifecycle::runner";

/// Time a terminated command is given to exit before it is killed.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Time allowed for output readers to drain after the child exits.
///
/// A descendant that escaped the process group can hold the pipes open
/// indefinitely; the exit is reported regardless once this elapses.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes commands as supervised child processes.
///
/// Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use homestead_lifecycle::runner::{CommandExecutor, CommandSpec, ProcessExecutor};
///
/// # async fn demo() -> Result<(), homestead_lifecycle::RunnerError> {
/// let handle = ProcessExecutor.spawn(&CommandSpec::shell("echo hello", "/tmp"))?;
/// let exit = handle.wait().await;
/// assert!(exit.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle, RunnerError> {
        if spec.is_noop() {
            debug!(target: PROCESS_TARGET, "empty command completes immediately");
            return Ok(ProcessHandle::finished(ProcessExit::success()));
        }
        let runtime = Handle::try_current().map_err(|_| RunnerError::NoRuntime {
            command: spec.to_string(),
        })?;
        // Entering the runtime lets the child register with its reactor even
        // when the caller is a plain thread holding a handle.
        let _entered = runtime.enter();

        let mut command = build_command(spec);
        debug!(
            target: PROCESS_TARGET,
            command = %spec,
            working_dir = %spec.working_dir().display(),
            "spawning command"
        );
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            command: spec.to_string(),
            source: Arc::new(source),
        })?;
        let process_id = child.id();

        let (sender, events) = mpsc::unbounded_channel();
        let (canceller, signal) = ProcessCanceller::new();
        let readers = [
            child
                .stdout
                .take()
                .map(|stdout| spawn_reader(&runtime, stdout, sender.clone(), ProcessEvent::Stdout)),
            child
                .stderr
                .take()
                .map(|stderr| spawn_reader(&runtime, stderr, sender.clone(), ProcessEvent::Stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        runtime.spawn(supervise(Supervision {
            child,
            process_id,
            signal,
            timeout: spec.timeout(),
            readers,
            events: sender,
            command: spec.to_string(),
        }));
        Ok(ProcessHandle::new(process_id, events, canceller))
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut command = match spec.line() {
        CommandLine::Shell(line) => shell_command(line),
        CommandLine::Argv { program, args } => {
            let mut argv = Command::new(program);
            argv.args(args);
            argv
        }
    };
    command
        .current_dir(spec.working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

/// Forwards each line of `reader` as an event built by `wrap`.
///
/// Invalid UTF-8 is replaced rather than ending the stream so the pipe keeps
/// draining.
fn spawn_reader<R>(
    runtime: &Handle,
    reader: R,
    events: UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    runtime.spawn(async move {
        let mut buffered = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match buffered.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buffer);
                    let line = text.trim_end_matches(['\n', '\r']).to_owned();
                    // The receiver may be gone; keep reading so the child
                    // never blocks on a full pipe.
                    drop(events.send(wrap(line)));
                }
                Err(error) => {
                    debug!(target: PROCESS_TARGET, %error, "output reader stopped");
                    break;
                }
            }
        }
    })
}

struct Supervision {
    child: Child,
    process_id: Option<u32>,
    signal: CancelSignal,
    timeout: Option<Duration>,
    readers: Vec<JoinHandle<()>>,
    events: UnboundedSender<ProcessEvent>,
    command: String,
}

async fn supervise(supervision: Supervision) {
    let Supervision {
        mut child,
        process_id,
        mut signal,
        timeout,
        readers,
        events,
        command,
    } = supervision;

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => future::pending::<()>().await,
        }
    };
    let mut cancelled = false;
    let mut timed_out = false;
    let reaped = tokio::select! {
        result = child.wait() => result,
        () = signal.cancelled() => {
            cancelled = true;
            debug!(target: PROCESS_TARGET, command = %command, "cancelling command");
            terminate(&mut child, process_id, &command).await
        }
        () = deadline => {
            timed_out = true;
            warn!(target: PROCESS_TARGET, command = %command, ?timeout, "command timed out");
            terminate(&mut child, process_id, &command).await
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            warn!(target: PROCESS_TARGET, command = %command, "output still open after exit");
            reader.abort();
        }
    }

    let exit = match reaped {
        Ok(status) => exit_from_status(status, cancelled, timed_out),
        Err(error) => {
            warn!(target: PROCESS_TARGET, command = %command, %error, "failed to reap command");
            ProcessExit {
                cancelled,
                timed_out,
                ..ProcessExit::default()
            }
        }
    };
    debug!(
        target: PROCESS_TARGET,
        command = %command,
        code = ?exit.code,
        signal = ?exit.signal,
        cancelled,
        timed_out,
        "command exited"
    );
    drop(events.send(ProcessEvent::Exited(exit)));
}

/// Asks the process group to stop, killing it after the grace period.
async fn terminate(
    child: &mut Child,
    process_id: Option<u32>,
    command: &str,
) -> io::Result<ExitStatus> {
    if !signal_group(child, process_id, GroupSignal::Terminate) {
        return child.wait().await;
    }
    if let Ok(status) = tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await {
        return status;
    }
    warn!(
        target: PROCESS_TARGET,
        command,
        grace_secs = KILL_GRACE_PERIOD.as_secs(),
        "command ignored termination; killing"
    );
    signal_group(child, process_id, GroupSignal::Kill);
    child.wait().await
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signals the child's process group.
///
/// Returns `false` when the child had already been reaped, in which case
/// there is nothing left to wait for beyond collecting its status.
#[cfg(unix)]
fn signal_group(child: &mut Child, process_id: Option<u32>, which: GroupSignal) -> bool {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(group) = process_id.and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    let signal = match which {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    if let Err(error) = killpg(Pid::from_raw(group), signal) {
        debug!(target: PROCESS_TARGET, %error, ?signal, "process group signal failed");
        drop(child.start_kill());
    }
    true
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, process_id: Option<u32>, _which: GroupSignal) -> bool {
    if process_id.is_none() {
        return false;
    }
    drop(child.start_kill());
    true
}

#[cfg(unix)]
fn exit_from_status(status: ExitStatus, cancelled: bool, timed_out: bool) -> ProcessExit {
    use std::os::unix::process::ExitStatusExt;

    ProcessExit {
        code: status.code(),
        signal: status.signal(),
        cancelled,
        timed_out,
    }
}

#[cfg(not(unix))]
fn exit_from_status(status: ExitStatus, cancelled: bool, timed_out: bool) -> ProcessExit {
    ProcessExit {
        code: status.code(),
        signal: None,
        cancelled,
        timed_out,
    }
}
