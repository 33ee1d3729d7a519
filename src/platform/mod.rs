//! Platform-specific process signalling.
//!
//! Provides a cross-platform [`ProcessSignals`] trait with a "request graceful
//! stop" / "force stop" pair. On Unix this maps to `SIGTERM` / `SIGKILL`. On
//! other platforms there is no graceful signal, so both operations terminate
//! the process outright.
//!
//! The escalation itself (ask, wait, then force) lives here once and is shared
//! by the command executor and the process terminator.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{info, warn};

#[cfg(not(unix))]
mod stub;
#[cfg(unix)]
mod unix;

/// Upper bound on how long a process gets to exit after a graceful stop
/// request before it is force-stopped.
pub const MAX_TERMINATE_WAIT: Duration = Duration::from_secs(1);

/// Sends stop requests to OS processes.
pub trait ProcessSignals: Send + Sync {
    /// Ask the process to exit (`SIGTERM` on Unix).
    fn request_stop(&self, pid: u32) -> io::Result<()>;

    /// Stop the process without its cooperation (`SIGKILL` on Unix).
    fn force_stop(&self, pid: u32) -> io::Result<()>;

    /// Returns `true` while the process exists and has not exited.
    ///
    /// Zombies (exited but not yet reaped) count as exited.
    fn is_running(&self, pid: u32) -> bool;
}

/// Create the platform-appropriate signaller.
pub fn os_signals() -> Arc<dyn ProcessSignals> {
    #[cfg(unix)]
    {
        Arc::new(unix::UnixSignals)
    }
    #[cfg(not(unix))]
    {
        Arc::new(stub::KillOnlySignals)
    }
}

/// How long to wait for a graceful exit: `min(1s, timeout)`.
pub fn terminate_wait(timeout: Duration) -> Duration {
    timeout.min(MAX_TERMINATE_WAIT)
}

/// Outcome of a stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The process exited after the graceful request.
    Terminated,
    /// The process ignored the request and was force-stopped.
    Killed,
    /// The process ignored the request and the force-stop failed.
    KillFailed,
}

/// Request a graceful stop, then wait for `exited` up to `wait`, then
/// force-stop.
///
/// A failed graceful request is logged and escalation continues.
pub async fn escalate<F>(signals: &dyn ProcessSignals, pid: u32, wait: Duration, exited: F) -> Escalation
where
    F: Future<Output = ()>,
{
    if let Err(e) = signals.request_stop(pid) {
        warn!(pid, error = %e, "error sending terminate");
    }
    wait_or_kill(signals, pid, wait, exited).await
}

/// Wait for `exited` up to `wait`; force-stop the process if it is still
/// around afterwards.
pub async fn wait_or_kill<F>(
    signals: &dyn ProcessSignals,
    pid: u32,
    wait: Duration,
    exited: F,
) -> Escalation
where
    F: Future<Output = ()>,
{
    if tokio::time::timeout(wait, exited).await.is_ok() {
        info!(pid, "process terminated");
        return Escalation::Terminated;
    }

    warn!(pid, ?wait, "process failed to terminate, killing");
    match signals.force_stop(pid) {
        Ok(()) => {
            warn!(pid, "killed process");
            Escalation::Killed
        }
        Err(e) => {
            warn!(pid, error = %e, "error trying to kill process");
            Escalation::KillFailed
        }
    }
}

/// Resolves once `signals` reports the process gone, polling every `interval`.
pub async fn until_exited(signals: &dyn ProcessSignals, pid: u32, interval: Duration) {
    while signals.is_running(pid) {
        tokio::time::sleep(interval).await;
    }
}

/// Look `pid` up in the OS process table.
fn is_listed(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}
