//! Test doubles shared by the orchestrator unit tests and the scenarios.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{Notify, broadcast, mpsc};

use crate::autostart::AutostartRegistry;
use crate::catalog::{AppDescriptor, Catalog};
use crate::error::RunnerError;
use crate::orchestrator::{LifecycleEvent, Orchestrator, OrchestratorOptions};
use crate::runner::{
    CommandExecutor, CommandSpec, ProcessCanceller, ProcessEvent, ProcessExit, ProcessHandle,
};
use crate::state::{AutostartLedger, Phase, StateStore};

/// Process id reported for every scripted command.
pub(crate) const SCRIPTED_PID: u32 = 4242;

/// Behaviour of a scripted command.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Prints `stdout` and exits with `code`.
    Exit { code: i32, stdout: Vec<String> },
    /// Creates the directory named by the last argument, like `git clone`.
    Clone,
    /// Exits successfully once the notify is triggered.
    Gate(Arc<Notify>),
    /// Runs until cancelled or until its timeout elapses, then reports
    /// SIGTERM.
    Hang,
    /// Fails to start.
    Missing,
}

impl Script {
    pub(crate) const fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            stdout: Vec::new(),
        }
    }

    pub(crate) fn print(line: &str) -> Self {
        Self::Exit {
            code: 0,
            stdout: vec![line.to_owned()],
        }
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    script: Script,
    once: bool,
}

/// A command the executor was asked to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub command: String,
    pub working_dir: PathBuf,
    /// For [`Script::Clone`], whether the destination existed beforehand.
    pub target_existed: bool,
    pub timeout: Option<Duration>,
}

/// Executor answering commands from substring rules.
///
/// The first rule whose pattern occurs in the rendered command wins;
/// commands no rule matches exit successfully without output.
#[derive(Debug, Default)]
pub(crate) struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExecutor {
    /// An executor whose `git clone` creates the destination.
    pub(crate) fn with_clone() -> Self {
        Self::default().respond("clone", Script::Clone)
    }

    pub(crate) fn respond(self, pattern: &str, script: Script) -> Self {
        self.push(pattern, script, false);
        self
    }

    /// Like [`Self::respond`], but the rule is consumed by its first match.
    pub(crate) fn respond_once(self, pattern: &str, script: Script) -> Self {
        self.push(pattern, script, true);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.command).collect()
    }

    fn push(&self, pattern: &str, script: Script, once: bool) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                pattern: pattern.to_owned(),
                script,
                once,
            });
    }

    fn script_for(&self, command: &str) -> Script {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = rules
            .iter()
            .position(|rule| command.contains(&rule.pattern))
        else {
            return Script::exit(0);
        };
        if rules.get(position).is_some_and(|rule| rule.once) {
            return rules.remove(position).script;
        }
        rules
            .get(position)
            .map_or_else(|| Script::exit(0), |rule| rule.script.clone())
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle, RunnerError> {
        let command = spec.to_string();
        let script = self.script_for(&command);
        let mut target_existed = false;
        if matches!(script, Script::Clone)
            && let Some(destination) = spec.args().last()
        {
            target_existed = fs::metadata(destination).is_ok();
            fs::create_dir_all(destination).map_err(|source| RunnerError::Spawn {
                command: command.clone(),
                source: Arc::new(source),
            })?;
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                command: command.clone(),
                working_dir: spec.working_dir().to_path_buf(),
                target_existed,
                timeout: spec.timeout(),
            });
        if matches!(script, Script::Missing) {
            return Err(RunnerError::Spawn {
                command,
                source: Arc::new(io::Error::from(io::ErrorKind::NotFound)),
            });
        }

        let (sender, events) = mpsc::unbounded_channel();
        let (canceller, mut signal) = ProcessCanceller::new();
        let timeout = spec.timeout();
        tokio::spawn(async move {
            let exit = match script {
                Script::Exit { code, stdout } => {
                    for line in stdout {
                        drop(sender.send(ProcessEvent::Stdout(line)));
                    }
                    ProcessExit::with_code(code)
                }
                Script::Clone | Script::Missing => ProcessExit::success(),
                Script::Gate(gate) => {
                    gate.notified().await;
                    ProcessExit::success()
                }
                Script::Hang => {
                    let timed_out = match timeout {
                        Some(limit) => tokio::select! {
                            () = signal.cancelled() => false,
                            () = tokio::time::sleep(limit) => true,
                        },
                        None => {
                            signal.cancelled().await;
                            false
                        }
                    };
                    ProcessExit {
                        signal: Some(15),
                        cancelled: !timed_out,
                        timed_out,
                        ..ProcessExit::default()
                    }
                }
            };
            drop(sender.send(ProcessEvent::Exited(exit)));
        });
        Ok(ProcessHandle::new(Some(SCRIPTED_PID), events, canceller))
    }
}

/// Two-application catalog used throughout the tests.
///
/// `notes` has install and setup commands; `feeds` has neither.
pub(crate) fn sample_catalog() -> Catalog {
    Catalog::from_descriptors([
        AppDescriptor::new(
            "notes",
            "Notes",
            "https://example.test/notes.git",
            "npm start",
        )
        .with_install_command("npm install")
        .with_setup_command("npm run migrate"),
        AppDescriptor::new("feeds", "Feeds", "https://example.test/feeds.git", "./feeds"),
    ])
    .expect("valid catalog")
}

/// An orchestrator over a temporary download directory.
pub(crate) struct Harness {
    pub orchestrator: Orchestrator,
    pub executor: Arc<ScriptedExecutor>,
    pub downloads: TempDir,
}

impl Harness {
    pub(crate) fn new(executor: ScriptedExecutor, registry: Arc<dyn AutostartRegistry>) -> Self {
        Self::with_options(executor, registry, quiet_options())
    }

    /// Builds the harness after `prepare` has populated the download
    /// directory, so reconciliation sees its contents.
    pub(crate) fn prepared(
        executor: ScriptedExecutor,
        registry: Arc<dyn AutostartRegistry>,
        prepare: impl FnOnce(&TempDir),
    ) -> Self {
        Self::prepared_with_options(executor, registry, quiet_options(), prepare)
    }

    pub(crate) fn prepared_with_options(
        executor: ScriptedExecutor,
        registry: Arc<dyn AutostartRegistry>,
        options: OrchestratorOptions,
        prepare: impl FnOnce(&TempDir),
    ) -> Self {
        let downloads = TempDir::new().expect("temp dir");
        prepare(&downloads);
        Self::assemble(executor, registry, options, downloads)
    }

    pub(crate) fn with_options(
        executor: ScriptedExecutor,
        registry: Arc<dyn AutostartRegistry>,
        options: OrchestratorOptions,
    ) -> Self {
        let downloads = TempDir::new().expect("temp dir");
        Self::assemble(executor, registry, options, downloads)
    }

    fn assemble(
        executor: ScriptedExecutor,
        registry: Arc<dyn AutostartRegistry>,
        options: OrchestratorOptions,
        downloads: TempDir,
    ) -> Self {
        let catalog = Arc::new(sample_catalog());
        let store = Arc::new(StateStore::reconcile(
            &catalog,
            downloads.path(),
            AutostartLedger::in_memory(),
        ));
        let executor = Arc::new(executor);
        let orchestrator = Orchestrator::new(
            catalog,
            store,
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            registry,
            options,
        )
        .expect("inside a runtime");
        Self {
            orchestrator,
            executor,
            downloads,
        }
    }

    pub(crate) fn install_path(&self, id: &str) -> PathBuf {
        self.downloads.path().join(id)
    }
}

/// Options with run-after-install switched off.
pub(crate) fn quiet_options() -> OrchestratorOptions {
    OrchestratorOptions {
        run_after_install: false,
        ..OrchestratorOptions::default()
    }
}

/// Drains every event already published to `events`.
pub(crate) fn drain(events: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

/// The phase path taken by `app_id` according to `events`.
pub(crate) fn phases(events: &[LifecycleEvent], app_id: &str) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::PhaseChanged { app_id: id, to, .. } if id == app_id => Some(*to),
            _ => None,
        })
        .collect()
}

/// Waits until `app_id` enters `phase`.
pub(crate) async fn wait_for_phase(
    events: &mut broadcast::Receiver<LifecycleEvent>,
    app_id: &str,
    phase: Phase,
) {
    let reached = async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if let LifecycleEvent::PhaseChanged { app_id: id, to, .. } = event
                && id == app_id
                && to == phase
            {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), reached)
        .await
        .expect("phase reached in time");
}
