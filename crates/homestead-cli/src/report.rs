//! Human-readable rendering of states, events and outcomes.

use std::io::{self, Write};

use homestead_lifecycle::{LifecycleEvent, LifecycleState, Operation, Outcome, ProcessExit};
use time::format_description::well_known::Rfc3339;

/// One `list` row: id, phase and autostart marker, tab separated.
pub(crate) fn state_row(state: &LifecycleState) -> String {
    let autostart = if state.autostart_enabled { "autostart" } else { "-" };
    format!("{}\t{}\t{autostart}", state.id, state.phase)
}

/// Writes the `status` block for `state`.
pub(crate) fn write_status(
    out: &mut impl Write,
    name: &str,
    state: &LifecycleState,
) -> io::Result<()> {
    writeln!(out, "id:         {}", state.id)?;
    writeln!(out, "name:       {name}")?;
    writeln!(out, "phase:      {}", state.phase)?;
    writeln!(out, "path:       {}", state.install_path.display())?;
    writeln!(
        out,
        "autostart:  {}",
        if state.autostart_enabled { "enabled" } else { "disabled" }
    )?;
    if let Some(pid) = state.process_id.filter(|_| state.process_active) {
        writeln!(out, "process:    {pid}")?;
    }
    if let Some(failure) = &state.last_error {
        let at = failure
            .recorded_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| failure.recorded_at.to_string());
        writeln!(out, "last error: {failure} (at {at})")?;
    }
    Ok(())
}

/// Writes `event`: output lines to `stdout`, phase changes to `stderr`.
pub(crate) fn write_event(
    stdout: &mut impl Write,
    stderr: &mut impl Write,
    event: &LifecycleEvent,
) -> io::Result<()> {
    match event {
        LifecycleEvent::Output { line, .. } => writeln!(stdout, "{line}"),
        LifecycleEvent::PhaseChanged { app_id, to, .. } => writeln!(stderr, "{app_id}: {to}"),
    }
}

/// Status line summarising the outcome of `operation` on `app_id`.
pub(crate) fn outcome_message(app_id: &str, operation: Operation, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Installed { .. } => format!("installed {app_id}"),
        Outcome::Updated => format!("updated {app_id}"),
        Outcome::UpToDate => format!("{app_id} is already up to date"),
        Outcome::Exited(exit) => exit_message(app_id, exit),
        Outcome::Removed => format!("removed {app_id}"),
        Outcome::Failed(failure) => format!("could not {operation} {app_id}: {failure}"),
    }
}

fn exit_message(app_id: &str, exit: &ProcessExit) -> String {
    if exit.cancelled {
        return format!("{app_id} stopped");
    }
    match (exit.code, exit.signal) {
        (Some(code), _) => format!("{app_id} exited with status {code}"),
        (None, Some(signal)) => format!("{app_id} was terminated by signal {signal}"),
        (None, None) => format!("{app_id} exited"),
    }
}
