//! Command handlers.
//!
//! Each handler builds only what it needs: the settings commands touch the
//! settings file alone, everything else reconciles state from the catalog
//! and the download directory before acting.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::slice;
use std::sync::Arc;

use homestead_config::{Config, SettingsStore, SettingsUpdate};
use homestead_lifecycle::{
    AppDescriptor, AutostartLedger, Catalog, DesktopEntryRegistry, LifecycleEvent, Orchestrator,
    OrchestratorOptions, Outcome, PendingOperation, ProcessExecutor, StateStore,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::IoStreams;
use crate::cli::{AutostartAction, Command, SettingsAction};
use crate::errors::AppError;
use crate::report;

const CLI_TARGET: &str = "homestead_cli";

pub(crate) async fn execute<W, E>(
    command: Command,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let settings_store = config.settings_store();
    let catalog_path = config.catalog_path();
    let connect = || assemble(&catalog_path, &settings_store);

    match command {
        Command::Settings { action } => settings(&settings_store, action, io),
        Command::List => list(&connect()?, io),
        Command::Status { id } => status(&connect()?, &id, io),
        Command::Install { id } => {
            let orchestrator = connect()?;
            let mut events = orchestrator.subscribe();
            let pending = orchestrator.install(&id)?;
            follow(&orchestrator, pending, &mut events, slice::from_ref(&id), io)
                .await
                .map(exit_code)
        }
        Command::Update { id } => {
            let orchestrator = connect()?;
            let mut events = orchestrator.subscribe();
            let pending = orchestrator.update(&id)?;
            follow(&orchestrator, pending, &mut events, slice::from_ref(&id), io)
                .await
                .map(exit_code)
        }
        Command::Run { id } => {
            let orchestrator = connect()?;
            let mut events = orchestrator.subscribe();
            let pending = orchestrator.run(&id)?;
            follow(&orchestrator, pending, &mut events, slice::from_ref(&id), io)
                .await
                .map(exit_code)
        }
        Command::Uninstall { id } => {
            let orchestrator = connect()?;
            let mut events = orchestrator.subscribe();
            let pending = orchestrator.uninstall(&id)?;
            follow(&orchestrator, pending, &mut events, slice::from_ref(&id), io)
                .await
                .map(exit_code)
        }
        Command::Autostart { action } => autostart(&connect()?, action, io),
        Command::Clear => clear(&connect()?, io).await,
    }
}

/// Loads settings, catalog and autostart ledger and wires the orchestrator.
fn assemble(
    catalog_path: &Path,
    settings_store: &SettingsStore,
) -> Result<Orchestrator, AppError> {
    let settings = settings_store.load()?;
    let catalog = Arc::new(Catalog::load_path(catalog_path)?);
    let download_directory = settings.prepare_download_directory()?;
    let ledger = AutostartLedger::load(settings_store.autostart_ledger_path())?;
    let store = Arc::new(StateStore::reconcile(&catalog, download_directory, ledger));
    let registry = DesktopEntryRegistry::for_current_user().map_err(AppError::Registry)?;
    debug!(
        target: CLI_TARGET,
        catalog = %catalog_path.display(),
        settings = %settings_store.path().display(),
        autostart = %registry.directory().display(),
        "collaborators assembled"
    );
    Ok(Orchestrator::new(
        catalog,
        store,
        Arc::new(ProcessExecutor),
        Arc::new(registry),
        OrchestratorOptions::from_settings(&settings),
    )?)
}

fn list<W, E>(
    orchestrator: &Orchestrator,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    for state in orchestrator.list() {
        writeln!(io.stdout, "{}", report::state_row(&state))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn status<W, E>(
    orchestrator: &Orchestrator,
    id: &str,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let state = orchestrator.state(id)?;
    let name = orchestrator
        .catalog()
        .find(id)
        .map_or(id, AppDescriptor::name);
    report::write_status(io.stdout, name, &state)?;
    Ok(ExitCode::SUCCESS)
}

fn autostart<W, E>(
    orchestrator: &Orchestrator,
    action: AutostartAction,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    match action {
        AutostartAction::Enable { id } => {
            orchestrator.enable_autostart(&id)?;
            writeln!(io.stderr, "autostart enabled for {id}")?;
        }
        AutostartAction::Disable { id } => {
            orchestrator.disable_autostart(&id)?;
            writeln!(io.stderr, "autostart disabled for {id}")?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn clear<W, E>(
    orchestrator: &Orchestrator,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let mut events = orchestrator.subscribe();
    let attempts = orchestrator.clear_installed();
    if attempts.is_empty() {
        writeln!(io.stderr, "nothing to clear")?;
        return Ok(ExitCode::SUCCESS);
    }
    let clearing: Vec<String> = attempts
        .iter()
        .filter(|(_, attempt)| attempt.is_ok())
        .map(|(id, _)| id.clone())
        .collect();
    let mut all_removed = true;
    for (id, attempt) in attempts {
        let removed = match attempt {
            Ok(pending) => follow(orchestrator, pending, &mut events, &clearing, io).await?,
            Err(error) => {
                writeln!(io.stderr, "could not uninstall {id}: {error}")?;
                false
            }
        };
        all_removed &= removed;
    }
    Ok(exit_code(all_removed))
}

/// Streams the events of the `shown` applications until `pending`
/// completes, then reports its outcome. Returns whether the outcome counts
/// as a success.
///
/// A successful install that started the application keeps following the
/// run. Ctrl-C cancels a run; other operations run to completion.
async fn follow<W, E>(
    orchestrator: &Orchestrator,
    pending: PendingOperation,
    events: &mut broadcast::Receiver<LifecycleEvent>,
    shown: &[String],
    io: &mut IoStreams<'_, W, E>,
) -> Result<bool, AppError>
where
    W: Write,
    E: Write,
{
    let mut current = pending;
    loop {
        let app_id = current.app_id().to_owned();
        let operation = current.operation();
        let outcome = watch(orchestrator, current, events, shown, io).await?;
        writeln!(
            io.stderr,
            "{}",
            report::outcome_message(&app_id, operation, &outcome)
        )?;
        let succeeded = outcome.is_success();
        let Outcome::Installed { run: Some(run) } = outcome else {
            return Ok(succeeded);
        };
        current = run;
    }
}

async fn watch<W, E>(
    orchestrator: &Orchestrator,
    pending: PendingOperation,
    events: &mut broadcast::Receiver<LifecycleEvent>,
    shown: &[String],
    io: &mut IoStreams<'_, W, E>,
) -> Result<Outcome, AppError>
where
    W: Write,
    E: Write,
{
    let concerns = |event: &LifecycleEvent| shown.iter().any(|id| id == event.app_id());
    let app_id = pending.app_id().to_owned();
    let finished = pending.wait();
    tokio::pin!(finished);
    let mut interrupted = false;
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) if concerns(&event) => {
                    report::write_event(io.stdout, io.stderr, &event)?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: CLI_TARGET, skipped, "output fell behind; events dropped");
                }
                Err(RecvError::Closed) => {}
            },
            outcome = &mut finished => {
                while let Ok(event) = events.try_recv() {
                    if concerns(&event) {
                        report::write_event(io.stdout, io.stderr, &event)?;
                    }
                }
                io.stdout.flush()?;
                return Ok(outcome);
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(error) = signal {
                    warn!(target: CLI_TARGET, %error, "cannot listen for Ctrl-C");
                    continue;
                }
                if orchestrator.cancel_run(&app_id)? {
                    writeln!(io.stderr, "stopping {app_id}")?;
                }
            }
        }
    }
}

fn settings<W, E>(
    store: &SettingsStore,
    action: SettingsAction,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    let current = match action {
        SettingsAction::Show => store.load()?,
        SettingsAction::Set {
            download_directory,
            run_after_install,
        } => {
            let update = SettingsUpdate {
                download_directory,
                run_after_install,
            };
            if update.is_empty() {
                return Err(AppError::EmptySettingsUpdate);
            }
            let (updated, changed) = store.update(update)?;
            if changed {
                writeln!(io.stderr, "saved {}", store.path().display())?;
            } else {
                writeln!(io.stderr, "settings unchanged")?;
            }
            updated
        }
    };
    serde_json::to_writer_pretty(&mut *io.stdout, &current).map_err(AppError::RenderSettings)?;
    writeln!(io.stdout)?;
    Ok(ExitCode::SUCCESS)
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
