//! CLI entrypoint for Homestead.
//!
//! The binary delegates to [`homestead_cli::run`], which parses arguments,
//! installs telemetry and drives the lifecycle operations.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    homestead_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
