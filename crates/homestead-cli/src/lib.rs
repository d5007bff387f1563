//! Command-line interface runtime for Homestead.
//!
//! The module owns argument parsing, telemetry bootstrapping and the wiring
//! of the lifecycle crate's collaborators. The interface is exercised both
//! from the binary entrypoint and from tests, which substitute the output
//! streams. Live application output is written to stdout; status messages
//! and diagnostics go to stderr.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod errors;
mod report;
mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader};
use errors::AppError;

/// Bundles the output streams handed to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, io: &mut IoStreams<'_, W, E>, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, io),
    };
    match execute(cli, io, loader) {
        Ok(exit_code) => exit_code,
        Err(error) => {
            drop(writeln!(io.stderr, "homestead: {error}"));
            ExitCode::FAILURE
        }
    }
}

fn execute<W, E, L>(
    cli: Cli,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let config = loader.load(&cli.config_arguments())?;
    telemetry::initialise(&config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;
    runtime.block_on(commands::execute(cli.command, &config, io))
}

/// Help and version requests go to stdout and succeed; genuine usage
/// errors go to stderr.
fn report_usage<W, E>(error: &clap::Error, io: &mut IoStreams<'_, W, E>) -> ExitCode
where
    W: Write,
    E: Write,
{
    let rendered = error.render();
    if error.use_stderr() {
        drop(write!(io.stderr, "{rendered}"));
        return ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1));
    }
    drop(write!(io.stdout, "{rendered}"));
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests;
