//! Unit tests for the CLI runtime driven through in-memory streams.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use homestead_config::{Config, LogFormat, Settings, SettingsStore};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::cli::{AutostartAction, Command, SettingsAction};
use crate::config::ConfigLoader;
use crate::errors::AppError;

/// A settings file, catalog and download directory under one temp dir.
struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn settings_path(&self) -> PathBuf {
        self.root.path().join("config/settings.json")
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.path().join("apps.json")
    }

    fn downloads(&self) -> PathBuf {
        self.root.path().join("apps")
    }

    fn checkout(&self, id: &str) -> PathBuf {
        let path = self.downloads().join(id);
        fs::create_dir_all(&path).expect("create checkout");
        path
    }

    fn invoke(&self, args: &[&str]) -> Invocation {
        let mut argv: Vec<OsString> = vec![
            "homestead".into(),
            "--settings-path".into(),
            self.settings_path().into(),
            "--catalog".into(),
            self.catalog_path().into(),
            "--log-filter".into(),
            "warn".into(),
        ];
        argv.extend(args.iter().map(OsString::from));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = run(argv, &mut stdout, &mut stderr);
        Invocation {
            exit_code,
            stdout: String::from_utf8(stdout).expect("utf-8 stdout"),
            stderr: String::from_utf8(stderr).expect("utf-8 stderr"),
        }
    }
}

struct Invocation {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

impl Invocation {
    fn succeeded(&self) -> bool {
        format!("{:?}", self.exit_code) == format!("{:?}", ExitCode::SUCCESS)
    }
}

#[fixture]
fn workspace() -> Workspace {
    let workspace = Workspace {
        root: TempDir::new().expect("temp dir"),
    };
    SettingsStore::new(workspace.settings_path())
        .save(&Settings::new(workspace.downloads(), false))
        .expect("save settings");
    let catalog = json!({
        "apps": [
            {
                "id": "notes",
                "name": "Notes",
                "sourceUrl": "https://example.test/notes.git",
                "startCommand": "echo hello from notes"
            },
            {
                "id": "feeds",
                "name": "Feeds",
                "sourceUrl": "https://example.test/feeds.git",
                "startCommand": "exit 4"
            }
        ]
    });
    fs::write(workspace.catalog_path(), catalog.to_string()).expect("write catalog");
    workspace
}

#[rstest]
#[case(&["list"], Command::List)]
#[case(&["status", "notes"], Command::Status { id: String::from("notes") })]
#[case(&["autostart", "enable", "notes"], Command::Autostart {
    action: AutostartAction::Enable { id: String::from("notes") },
})]
#[case(&["settings", "set", "--run-after-install", "false"], Command::Settings {
    action: SettingsAction::Set { download_directory: None, run_after_install: Some(false) },
})]
fn commands_parse(#[case] args: &[&str], #[case] expected: Command) {
    let cli = Cli::try_parse_from(std::iter::once("homestead").chain(args.iter().copied()))
        .expect("arguments parse");
    assert_eq!(cli.command, expected);
}

#[test]
fn global_flags_follow_the_subcommand() {
    let cli = Cli::try_parse_from(["homestead", "list", "--log-format", "json"])
        .expect("arguments parse");
    assert_eq!(cli.log_format, Some(LogFormat::Json));
}

#[test]
fn only_given_flags_reach_the_configuration_loader() {
    let cli = Cli::try_parse_from([
        "homestead",
        "list",
        "--catalog",
        "/srv/apps.json",
        "--log-format",
        "json",
    ])
    .expect("arguments parse");
    assert_eq!(
        cli.config_arguments(),
        ["homestead", "--catalog", "/srv/apps.json", "--log-format", "json"]
            .map(OsString::from)
            .to_vec()
    );
}

/// Supplies a fixed configuration regardless of flags or environment.
struct FixedLoader(Config);

impl ConfigLoader for FixedLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.0.clone())
    }
}

#[test]
fn help_goes_to_stdout() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = run(
        [OsString::from("homestead"), OsString::from("--help")],
        &mut stdout,
        &mut stderr,
    );
    assert_eq!(format!("{exit_code:?}"), format!("{:?}", ExitCode::SUCCESS));
    assert!(String::from_utf8_lossy(&stdout).contains("install"));
    assert!(stderr.is_empty());
}

#[test]
fn unknown_subcommands_are_usage_errors() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = run(
        [OsString::from("homestead"), OsString::from("explode")],
        &mut stdout,
        &mut stderr,
    );
    assert_eq!(format!("{exit_code:?}"), format!("{:?}", ExitCode::from(2)));
    assert!(!stderr.is_empty());
}

#[rstest]
fn loaded_configuration_locates_the_catalog(workspace: Workspace) {
    let loader = FixedLoader(Config {
        settings_path: Some(workspace.settings_path()),
        catalog: Some(workspace.catalog_path()),
        log_filter: String::from("warn"),
        ..Config::default()
    });
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut io = IoStreams::new(&mut stdout, &mut stderr);

    let exit_code = run_with_loader(["homestead", "list"].map(OsString::from), &mut io, &loader);

    assert_eq!(format!("{exit_code:?}"), format!("{:?}", ExitCode::SUCCESS));
    assert_eq!(
        String::from_utf8_lossy(&stdout),
        "notes\tnot installed\t-\nfeeds\tnot installed\t-\n"
    );
}

#[rstest]
fn list_shows_every_application(workspace: Workspace) {
    workspace.checkout("notes");

    let invocation = workspace.invoke(&["list"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert_eq!(
        invocation.stdout,
        "notes\tinstalled\t-\nfeeds\tnot installed\t-\n"
    );
}

#[rstest]
fn status_describes_one_application(workspace: Workspace) {
    let path = workspace.checkout("notes");

    let invocation = workspace.invoke(&["status", "notes"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert!(invocation.stdout.contains("name:       Notes"));
    assert!(invocation.stdout.contains("phase:      installed"));
    assert!(
        invocation
            .stdout
            .contains(&format!("path:       {}", path.display()))
    );
    assert!(invocation.stdout.contains("autostart:  disabled"));
}

#[rstest]
fn unknown_applications_fail(workspace: Workspace) {
    let invocation = workspace.invoke(&["status", "ghost"]);
    assert!(!invocation.succeeded());
    assert!(
        invocation
            .stderr
            .contains("application 'ghost' is not in the catalog")
    );
}

#[rstest]
fn rejected_operations_fail_without_side_effects(workspace: Workspace) {
    let path = workspace.checkout("notes");
    fs::write(path.join("README"), "keep").expect("write file");

    let invocation = workspace.invoke(&["install", "notes"]);

    assert!(!invocation.succeeded());
    assert!(
        invocation
            .stderr
            .contains("cannot install 'notes' while it is installed"),
        "{}",
        invocation.stderr
    );
    assert!(path.join("README").exists());
}

#[rstest]
fn uninstall_removes_the_checkout(workspace: Workspace) {
    let path = workspace.checkout("notes");

    let invocation = workspace.invoke(&["uninstall", "notes"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert!(!path.exists());
    assert!(invocation.stderr.contains("notes: removing"));
    assert!(invocation.stderr.contains("removed notes"));
}

#[rstest]
fn clear_with_nothing_installed(workspace: Workspace) {
    let invocation = workspace.invoke(&["clear"]);
    assert!(invocation.succeeded());
    assert!(invocation.stderr.contains("nothing to clear"));
}

#[rstest]
fn clear_removes_every_checkout(workspace: Workspace) {
    let notes = workspace.checkout("notes");
    let feeds = workspace.checkout("feeds");

    let invocation = workspace.invoke(&["clear"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert!(!notes.exists());
    assert!(!feeds.exists());
}

#[rstest]
fn clear_reports_progress_for_every_application(workspace: Workspace) {
    workspace.checkout("notes");
    workspace.checkout("feeds");

    let invocation = workspace.invoke(&["clear"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    for line in [
        "notes: removing",
        "feeds: removing",
        "notes: not installed",
        "feeds: not installed",
        "removed notes",
        "removed feeds",
    ] {
        assert_eq!(
            invocation.stderr.lines().filter(|shown| *shown == line).count(),
            1,
            "{line} in {}",
            invocation.stderr
        );
    }
}

#[cfg(unix)]
#[rstest]
fn run_streams_application_output(workspace: Workspace) {
    workspace.checkout("notes");

    let invocation = workspace.invoke(&["run", "notes"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert_eq!(invocation.stdout, "hello from notes\n");
    assert!(invocation.stderr.contains("notes exited with status 0"));
}

#[cfg(unix)]
#[rstest]
fn failing_run_sets_a_failure_exit_code(workspace: Workspace) {
    workspace.checkout("feeds");

    let invocation = workspace.invoke(&["run", "feeds"]);

    assert!(!invocation.succeeded());
    assert!(invocation.stderr.contains("feeds exited with status 4"));
    let status = workspace.invoke(&["status", "feeds"]);
    assert!(
        !status.stdout.contains("last error"),
        "each invocation reconciles afresh: {}",
        status.stdout
    );
}

#[rstest]
fn missing_catalog_is_fatal(workspace: Workspace) {
    fs::remove_file(workspace.catalog_path()).expect("remove catalog");
    let invocation = workspace.invoke(&["list"]);
    assert!(!invocation.succeeded());
    assert!(invocation.stderr.contains("failed to read catalog"));
}

#[rstest]
fn settings_show_prints_json(workspace: Workspace) {
    let invocation = workspace.invoke(&["settings", "show"]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    let shown: serde_json::Value =
        serde_json::from_str(&invocation.stdout).expect("settings are JSON");
    assert_eq!(shown.get("runAfterInstall"), Some(&json!(false)));
    assert_eq!(
        shown.get("downloadDirectory"),
        Some(&json!(workspace.downloads().display().to_string()))
    );
}

#[rstest]
fn settings_set_persists_changes(workspace: Workspace) {
    let target = workspace.root.path().join("elsewhere");
    let target_arg = target.display().to_string();

    let invocation = workspace.invoke(&[
        "settings",
        "set",
        "--download-directory",
        &target_arg,
        "--run-after-install",
        "true",
    ]);

    assert!(invocation.succeeded(), "{}", invocation.stderr);
    assert!(invocation.stderr.contains("saved"));
    let stored = SettingsStore::new(workspace.settings_path())
        .load()
        .expect("settings reload");
    assert_eq!(stored, Settings::new(target, true));

    let repeated = workspace.invoke(&["settings", "set", "--run-after-install", "true"]);
    assert!(repeated.stderr.contains("settings unchanged"));
}

#[rstest]
#[case(&["settings", "set"], "needs --download-directory")]
#[case(
    &["settings", "set", "--download-directory", "relative/apps"],
    "must be an absolute path"
)]
fn invalid_settings_updates_fail(
    workspace: Workspace,
    #[case] args: &[&str],
    #[case] message: &str,
) {
    let invocation = workspace.invoke(args);
    assert!(!invocation.succeeded());
    assert!(invocation.stderr.contains(message), "{}", invocation.stderr);
}
