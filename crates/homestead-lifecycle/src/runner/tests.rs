//! Unit tests for command specs and the process executor.

use std::time::Duration;

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::error::RunnerError;

#[rstest]
#[case(ProcessExit::success(), true)]
#[case(ProcessExit::with_code(3), false)]
fn success_means_status_zero(#[case] exit: ProcessExit, #[case] expected: bool) {
    assert_eq!(exit.is_success(), expected);
}

#[test]
fn exit_classification() {
    assert!(ProcessExit::success().into_result().is_ok());
    assert!(matches!(
        ProcessExit::with_code(2).into_result(),
        Err(RunnerError::CommandFailed { code: 2 })
    ));
    let killed = ProcessExit {
        signal: Some(9),
        ..ProcessExit::default()
    };
    assert!(matches!(
        killed.into_result(),
        Err(RunnerError::CommandCancelled { signal: Some(9), timed_out: false })
    ));
    let expired = ProcessExit {
        timed_out: true,
        ..ProcessExit::default()
    };
    assert!(matches!(
        expired.into_result(),
        Err(RunnerError::CommandCancelled { timed_out: true, .. })
    ));
    assert!(matches!(
        ProcessExit::default().into_result(),
        Err(RunnerError::Lost)
    ));
}

#[test]
fn argv_specs_render_their_arguments() {
    let spec = CommandSpec::program("git", ["pull", "--ff-only"], "/srv/apps/notes");
    assert_eq!(spec.to_string(), "git pull --ff-only");
    assert_eq!(spec.args(), ["pull", "--ff-only"]);
    assert!(!spec.is_noop());
}

#[rstest]
#[case("")]
#[case("   ")]
fn blank_shell_lines_are_noops(#[case] line: &str) {
    assert!(CommandSpec::shell(line, "/").is_noop());
}

#[test]
fn canceller_clones_share_state() {
    let (canceller, _signal) = ProcessCanceller::new();
    let clone = canceller.clone();
    clone.cancel();
    clone.cancel();
    assert!(canceller.is_cancelled());
}

#[tokio::test]
async fn finished_handle_reports_exit_once() {
    let mut handle = ProcessHandle::finished(ProcessExit::with_code(4));
    assert_eq!(
        handle.next_event().await,
        Some(ProcessEvent::Exited(ProcessExit::with_code(4)))
    );
    assert_eq!(handle.next_event().await, None);
}

#[tokio::test]
async fn vanished_supervisor_yields_lost_exit() {
    let (sender, events) = tokio::sync::mpsc::unbounded_channel();
    let (canceller, _signal) = ProcessCanceller::new();
    drop(sender);
    let exit = ProcessHandle::new(None, events, canceller).wait().await;
    assert!(matches!(exit.into_result(), Err(RunnerError::Lost)));
}

#[tokio::test]
async fn empty_command_succeeds_immediately() {
    let handle = ProcessExecutor
        .spawn(&CommandSpec::shell("", "/nonexistent"))
        .expect("noop spawns");
    assert!(handle.wait().await.is_success());
}

#[cfg(unix)]
mod unix {
    use super::*;

    async fn collect(handle: ProcessHandle) -> (Vec<(OutputStream, String)>, ProcessExit) {
        let mut lines = Vec::new();
        let exit = handle
            .wait_with(|stream, line| lines.push((stream, line)))
            .await;
        (lines, exit)
    }

    #[tokio::test]
    async fn forwards_stdout_and_stderr_lines() {
        let dir = TempDir::new().expect("temp dir");
        let spec = CommandSpec::shell("echo one; echo two >&2; printf three", dir.path());
        let handle = ProcessExecutor.spawn(&spec).expect("spawn");

        let (lines, exit) = collect(handle).await;

        assert!(exit.is_success(), "{exit:?}");
        assert!(lines.contains(&(OutputStream::Stdout, String::from("one"))));
        assert!(lines.contains(&(OutputStream::Stderr, String::from("two"))));
        assert!(lines.contains(&(OutputStream::Stdout, String::from("three"))));
    }

    #[tokio::test]
    async fn runs_in_the_requested_directory() {
        let dir = TempDir::new().expect("temp dir");
        let canonical = dir.path().canonicalize().expect("canonical path");
        let before = std::env::current_dir().expect("cwd");
        let handle = ProcessExecutor
            .spawn(&CommandSpec::shell("pwd -P", &canonical))
            .expect("spawn");

        let (lines, _) = collect(handle).await;

        assert_eq!(
            lines,
            vec![(OutputStream::Stdout, canonical.display().to_string())]
        );
        assert_eq!(std::env::current_dir().expect("cwd"), before);
    }

    #[tokio::test]
    async fn reports_non_zero_exit_codes() {
        let dir = TempDir::new().expect("temp dir");
        let handle = ProcessExecutor
            .spawn(&CommandSpec::shell("exit 3", dir.path()))
            .expect("spawn");

        let exit = handle.wait().await;

        assert_eq!(exit.code, Some(3));
        assert!(matches!(
            exit.into_result(),
            Err(RunnerError::CommandFailed { code: 3 })
        ));
    }

    #[tokio::test]
    async fn argv_commands_bypass_the_shell() {
        let dir = TempDir::new().expect("temp dir");
        let handle = ProcessExecutor
            .spawn(&CommandSpec::program("echo", ["$HOME"], dir.path()))
            .expect("spawn");

        let (lines, exit) = collect(handle).await;

        assert!(exit.is_success());
        assert_eq!(lines, vec![(OutputStream::Stdout, String::from("$HOME"))]);
    }

    #[tokio::test]
    async fn cancellation_terminates_the_process_group_once() {
        let dir = TempDir::new().expect("temp dir");
        let mut handle = ProcessExecutor
            .spawn(&CommandSpec::shell("sleep 30 & wait", dir.path()))
            .expect("spawn");
        assert!(handle.process_id().is_some());
        let canceller = handle.canceller();
        canceller.cancel();
        canceller.cancel();

        let mut exits = Vec::new();
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = handle.next_event().await {
                if let ProcessEvent::Exited(exit) = event {
                    exits.push(exit);
                }
            }
        })
        .await;

        assert!(drained.is_ok(), "process group survived cancellation");
        assert_eq!(exits.len(), 1);
        let exit = exits.first().copied().expect("one exit");
        assert!(exit.cancelled);
        assert!(matches!(
            exit.into_result(),
            Err(RunnerError::CommandCancelled { timed_out: false, .. })
        ));
    }

    #[tokio::test]
    async fn timeout_cancels_and_is_flagged() {
        let dir = TempDir::new().expect("temp dir");
        let spec = CommandSpec::shell("sleep 30", dir.path())
            .with_timeout(Some(Duration::from_millis(100)));
        let handle = ProcessExecutor.spawn(&spec).expect("spawn");

        let exit = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("timeout enforced");

        assert!(exit.timed_out);
        assert!(!exit.cancelled);
        assert!(matches!(
            exit.into_result(),
            Err(RunnerError::CommandCancelled { timed_out: true, .. })
        ));
    }

    #[tokio::test]
    async fn cancelling_a_finished_command_is_harmless() {
        let dir = TempDir::new().expect("temp dir");
        let handle = ProcessExecutor
            .spawn(&CommandSpec::shell("true", dir.path()))
            .expect("spawn");
        let canceller = handle.canceller();

        let exit = handle.wait().await;
        canceller.cancel();

        assert!(exit.is_success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = TempDir::new().expect("temp dir");
        let error = ProcessExecutor
            .spawn(&CommandSpec::program(
                "homestead-definitely-missing-program",
                Vec::<String>::new(),
                dir.path(),
            ))
            .expect_err("spawn fails");
        assert!(matches!(error, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn missing_working_directory_is_a_spawn_error() {
        let dir = TempDir::new().expect("temp dir");
        let error = ProcessExecutor
            .spawn(&CommandSpec::shell("true", dir.path().join("absent")))
            .expect_err("spawn fails");
        assert!(matches!(error, RunnerError::Spawn { .. }));
    }
}

#[test]
fn spawning_outside_a_runtime_is_reported() {
    let error = ProcessExecutor
        .spawn(&CommandSpec::shell("true", "/"))
        .expect_err("no runtime");
    assert!(matches!(error, RunnerError::NoRuntime { .. }));
}
