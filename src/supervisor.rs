//! Child process supervision.
//!
//! Each source owns zero or more child processes spawned after a successful
//! rebuild. Relaunching a source signals its previous processes with
//! SIGTERM and spawns a fresh one; an exit observer removes handles from the
//! table as processes quiesce. Termination is a single graceful signal with
//! no forced-kill escalation, so a process that ignores it is expected to
//! exit on its own.
//!
//! The table is the only state shared across sources. A one-shot (non-watch)
//! run defers its own exit by awaiting [`ProcessSupervisor::wait_until_idle`],
//! which resolves once every table is empty and yields the exit code of the
//! last observed child.

use crate::error::CycleError;
use crate::source::SourceId;
use std::collections::HashMap;
use std::pin::pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Stable identity of one spawned child process.
pub type HandleId = u64;

/// One tracked child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: HandleId,
    /// The command line the process was spawned from.
    pub name: String,
    pub pid: Option<u32>,
}

#[derive(Default)]
struct Tables {
    tables: HashMap<SourceId, HashMap<HandleId, ProcessHandle>>,
    /// Exit code of the most recently exited child.
    last_exit_code: Option<i32>,
}

impl Tables {
    fn live_count(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    next_handle: AtomicU64,
    quiesced: Notify,
}

/// Owns the per-source process tables. Cheap to clone; all clones share the
/// same tables.
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal every process currently tracked for `source_id`, then spawn
    /// `command_line` under a fresh handle.
    ///
    /// Termination is fire-and-forget: the old handles stay in the table
    /// until their exit observers remove them, so relaunch never blocks the
    /// rebuild loop on process death.
    pub fn relaunch(
        &self,
        source_id: SourceId,
        command_line: &str,
    ) -> Result<ProcessHandle, CycleError> {
        self.terminate_source(source_id);
        self.spawn(source_id, command_line)
    }

    /// Send SIGTERM to every process tracked for one source.
    pub fn terminate_source(&self, source_id: SourceId) {
        let inner = self.lock();
        if let Some(table) = inner.tables.get(&source_id) {
            for handle in table.values() {
                info!(command = %handle.name, "stopping via SIGTERM");
                terminate(handle);
            }
        }
    }

    fn spawn(&self, source_id: SourceId, command_line: &str) -> Result<ProcessHandle, CycleError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|source| CycleError::Spawn {
            command: command_line.to_string(),
            source,
        })?;

        let handle = ProcessHandle {
            id: self.inner.next_handle.fetch_add(1, Ordering::Relaxed),
            name: command_line.to_string(),
            pid: child.id(),
        };
        info!(command = %handle.name, pid = ?handle.pid, "running command");

        {
            let mut inner = self.lock();
            inner
                .tables
                .entry(source_id)
                .or_default()
                .insert(handle.id, handle.clone());
        }

        let supervisor = self.clone();
        let observed = handle.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(1),
                Err(error) => {
                    warn!(command = %observed.name, "failed to observe exit: {error}");
                    1
                }
            };
            supervisor.on_exit(source_id, &observed, code);
        });

        Ok(handle)
    }

    fn on_exit(&self, source_id: SourceId, handle: &ProcessHandle, code: i32) {
        let mut inner = self.lock();
        if let Some(table) = inner.tables.get_mut(&source_id) {
            table.remove(&handle.id);
            if table.is_empty() {
                inner.tables.remove(&source_id);
            }
        }
        inner.last_exit_code = Some(code);
        debug!(command = %handle.name, code, "command exited");
        if inner.live_count() == 0 {
            self.inner.quiesced.notify_waiters();
        }
    }

    /// True when no tracked process from any source is still alive.
    pub fn is_idle(&self) -> bool {
        self.lock().live_count() == 0
    }

    /// Number of live processes across every source.
    pub fn live_count(&self) -> usize {
        self.lock().live_count()
    }

    /// Wait until every table is empty.
    ///
    /// Returns the exit code of the last child observed exiting, or `None`
    /// if nothing was ever spawned.
    pub async fn wait_until_idle(&self) -> Option<i32> {
        loop {
            let mut notified = pin!(self.inner.quiesced.notified());
            notified.as_mut().enable();
            {
                let inner = self.lock();
                if inner.live_count() == 0 {
                    return inner.last_exit_code;
                }
            }
            notified.await;
        }
    }
}

#[cfg(unix)]
fn terminate(handle: &ProcessHandle) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = handle.pid else {
        return;
    };
    if let Err(error) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(command = %handle.name, pid, "failed to signal: {error}");
    }
}

#[cfg(not(unix))]
fn terminate(handle: &ProcessHandle) {
    let Some(pid) = handle.pid else {
        return;
    };
    // taskkill without /F requests a graceful close.
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .spawn();
}
