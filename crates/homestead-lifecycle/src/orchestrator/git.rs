//! Git invocations used by the install and update pipelines.

use std::path::Path;

use crate::runner::CommandSpec;

/// `git clone -- <url> <destination>`, run from the download directory.
///
/// Returns `None` when `destination` is not valid UTF-8.
pub(super) fn clone(
    program: &str,
    url: &str,
    destination: &Path,
    working_dir: &Path,
) -> Option<CommandSpec> {
    let destination = destination.to_str()?;
    Some(CommandSpec::program(
        program,
        ["clone", "--", url, destination],
        working_dir,
    ))
}

/// `git rev-parse HEAD` inside `checkout`.
pub(super) fn head_revision(program: &str, checkout: &Path) -> CommandSpec {
    CommandSpec::program(program, ["rev-parse", "HEAD"], checkout)
}

/// `git pull --ff-only` inside `checkout`.
pub(super) fn pull(program: &str, checkout: &Path) -> CommandSpec {
    CommandSpec::program(program, ["pull", "--ff-only"], checkout)
}
