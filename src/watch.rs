//! Reactive rebuild loop.
//!
//! Each source definition file gets a debounced watcher and a rebuild gate.
//! The gate is a tri-state machine (`Idle` / `Running` / `Pending`) with
//! pure transition functions: a change observed while a cycle is in flight
//! latches exactly one rerun instead of starting a second concurrent cycle,
//! so rapid overlapping edits coalesce. Cycles for one source are strictly
//! serialized; distinct sources rebuild independently.
//!
//! A delete or rename of a watched definition is a hard stop: the source's
//! processes are terminated and the program ends.

use crate::error::CycleError;
use crate::schema::validate;
use crate::source::ConfigSource;
use crate::supervisor::ProcessSupervisor;
use crate::write::write_all;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Per-source rebuild gate.
///
/// At most one rebuild is in flight per source at any time. A change event
/// arriving while `Running` transitions to `Pending` and is never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildGate {
    /// No cycle in flight.
    #[default]
    Idle,
    /// One cycle in flight, nothing latched.
    Running,
    /// One cycle in flight and a rerun latched for when it completes.
    Pending,
}

impl RebuildGate {
    /// A change event arrived. Returns the next state and whether a new
    /// cycle should start now.
    #[must_use]
    pub fn on_change(self) -> (Self, bool) {
        match self {
            RebuildGate::Idle => (RebuildGate::Running, true),
            RebuildGate::Running | RebuildGate::Pending => (RebuildGate::Pending, false),
        }
    }

    /// The in-flight cycle finished. Returns the next state and whether a
    /// latched rerun should start.
    #[must_use]
    pub fn on_cycle_complete(self) -> (Self, bool) {
        match self {
            RebuildGate::Idle | RebuildGate::Running => (RebuildGate::Idle, false),
            RebuildGate::Pending => (RebuildGate::Running, true),
        }
    }
}

/// Event emitted for a watched source definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The definition file was modified (or created after the initial scan).
    Changed,
    /// The definition file was deleted or renamed away.
    Removed,
    /// The underlying watcher reported an error.
    Error(String),
}

/// Configuration for the per-source file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// Handle to one source's watcher.
pub struct SourceWatcherHandle {
    /// Receiver for source events. Events arriving while the consumer is
    /// busy coalesce into the latest value.
    pub events: watch::Receiver<Option<SourceEvent>>,
    /// Handle to the watcher pump (dropping it stops the watcher).
    _task_handle: tokio::task::JoinHandle<()>,
}

/// Start watching one source definition file.
///
/// The parent directory is watched non-recursively; events for other files
/// in it are ignored. An event whose path matches the definition is
/// classified by existence: still present means `Changed`, gone means
/// `Removed`.
pub fn start_source_watcher(
    source_path: &Path,
    config: &WatcherConfig,
) -> Result<SourceWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce, notify_tx)?;
    let watch_dir = source_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)?;

    let source_path = source_path.to_path_buf();
    let task_handle = tokio::task::spawn_blocking(move || {
        // Keep the debouncer alive for the lifetime of the pump.
        let _debouncer = debouncer;
        pump_notify_events(notify_rx, event_tx, &source_path);
    });

    Ok(SourceWatcherHandle {
        events: event_rx,
        _task_handle: task_handle,
    })
}

/// Forward debounced notify events as classified source events.
fn pump_notify_events(
    rx: mpsc::Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<SourceEvent>>,
    source_path: &Path,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                if let Some(event) = classify_events(events, source_path) {
                    debug!(source = %source_path.display(), "source event: {event:?}");
                    if tx.send(Some(event)).is_err() {
                        info!("source watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(error)) => {
                error!("file watcher error: {error}");
                let _ = tx.send(Some(SourceEvent::Error(error.to_string())));
            }
            Err(_) => {
                info!("source watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Reduce a batch of debounced events to at most one source event.
fn classify_events(events: Vec<DebouncedEvent>, source_path: &Path) -> Option<SourceEvent> {
    let touched = events.iter().any(|event| {
        matches!(
            event.kind,
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
        ) && touches_source(&event.path, source_path)
    });
    if !touched {
        return None;
    }
    Some(probe_source(source_path))
}

/// The watcher covers the whole parent directory; only events for the
/// definition file itself count.
fn touches_source(event_path: &Path, source_path: &Path) -> bool {
    event_path.file_name() == source_path.file_name()
}

/// A touched definition still on disk is a change; a missing one was
/// deleted or renamed away.
fn probe_source(source_path: &Path) -> SourceEvent {
    if source_path.exists() {
        SourceEvent::Changed
    } else {
        SourceEvent::Removed
    }
}

/// Options controlling a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Print the merged config to stdout before writing.
    pub verbose: bool,
    /// Keep watching after the startup rebuild.
    pub watch: bool,
    /// Command line to (re)launch after each successful rebuild.
    pub command: Option<String>,
    /// Directory output paths resolve against.
    pub base_dir: PathBuf,
}

/// Why a source's watch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The watched definition was deleted or renamed away.
    SourceRemoved,
    /// The watcher channel closed.
    WatcherClosed,
}

/// One full rebuild: reload, validate, write, relaunch.
pub async fn run_cycle(
    source: &ConfigSource,
    supervisor: &ProcessSupervisor,
    opts: &RunOptions,
) -> Result<(), CycleError> {
    info!(source = %source.path.display(), "writing config");
    let definition = source.load().await?;
    let validated =
        validate(&definition.schema, &definition.config).map_err(CycleError::Validation)?;
    if opts.verbose
        && let Ok(rendered) = serde_json::to_string_pretty(&validated)
    {
        println!("{rendered}");
    }
    write_all(&validated, &opts.base_dir).await?;
    info!(source = %source.path.display(), "config files written");
    if let Some(ref command) = opts.command {
        supervisor.relaunch(source.id, command)?;
    }
    Ok(())
}

/// Run one cycle, reporting recoverable failures and propagating fatal ones.
///
/// Recoverable errors (missing source, contract violations, validation
/// failures, write I/O) abort the cycle but keep the watch alive, so fixing
/// the definition triggers a fresh attempt.
pub async fn run_cycle_logged(
    source: &ConfigSource,
    supervisor: &ProcessSupervisor,
    opts: &RunOptions,
) -> Result<(), CycleError> {
    match run_cycle(source, supervisor, opts).await {
        Ok(()) => Ok(()),
        Err(cycle_error) if cycle_error.is_fatal() => Err(cycle_error),
        Err(cycle_error) => {
            report_cycle_error(&source.path, &cycle_error);
            Ok(())
        }
    }
}

fn report_cycle_error(path: &Path, cycle_error: &CycleError) {
    match cycle_error {
        CycleError::Validation(violations) => {
            error!(
                source = %path.display(),
                "validation failed with {} violation(s)",
                violations.len()
            );
            for violation in violations {
                error!("  {violation}");
            }
        }
        other => error!(source = %path.display(), "{other}"),
    }
}

/// Drive one source's watch loop until the definition is removed or a fatal
/// error occurs.
///
/// The startup rebuild must already have run; this loop only reacts to
/// events. Events observed while a cycle is in flight are latched through
/// the gate and replayed exactly once after the cycle completes, yielding to
/// the scheduler between cycles instead of recursing.
pub async fn watch_source(
    source: ConfigSource,
    supervisor: ProcessSupervisor,
    opts: Arc<RunOptions>,
    mut handle: SourceWatcherHandle,
) -> Result<WatchOutcome, CycleError> {
    let mut gate = RebuildGate::default();
    loop {
        if handle.events.changed().await.is_err() {
            return Ok(WatchOutcome::WatcherClosed);
        }
        let Some(event) = handle.events.borrow_and_update().clone() else {
            continue;
        };
        match event {
            SourceEvent::Error(message) => {
                warn!(source = %source.path.display(), "watcher error: {message}");
                continue;
            }
            SourceEvent::Removed => return Ok(hard_stop(&source, &supervisor)),
            SourceEvent::Changed => {}
        }

        info!(source = %source.path.display(), "change detected");
        let (next, start) = gate.on_change();
        gate = next;
        if !start {
            continue;
        }

        loop {
            run_cycle_logged(&source, &supervisor, &opts).await?;

            // Latch whatever arrived while the cycle ran.
            while handle.events.has_changed().unwrap_or(false) {
                match handle.events.borrow_and_update().clone() {
                    Some(SourceEvent::Removed) => return Ok(hard_stop(&source, &supervisor)),
                    Some(SourceEvent::Changed) => {
                        let (next, _) = gate.on_change();
                        gate = next;
                    }
                    Some(SourceEvent::Error(message)) => {
                        warn!(source = %source.path.display(), "watcher error: {message}");
                    }
                    None => {}
                }
            }

            let (next, rerun) = gate.on_cycle_complete();
            gate = next;
            if rerun {
                // Yield once so other tasks (exit observers included) get a
                // turn before the latched cycle starts.
                tokio::task::yield_now().await;
                continue;
            }
            break;
        }
        info!("waiting for changes...");
    }
}

fn hard_stop(source: &ConfigSource, supervisor: &ProcessSupervisor) -> WatchOutcome {
    info!(source = %source.path.display(), "definition removed, halting watch");
    supervisor.terminate_source(source.id);
    WatchOutcome::SourceRemoved
}
