//! Finding and terminating OS processes by executable path.
//!
//! Listing goes through a [`ProcessTable`] and signalling through
//! [`ProcessSignals`], so both can be swapped out in tests. A failed listing
//! is treated as "no processes" rather than an error: the watchdog depends on
//! these calls and must keep running when the process table is unavailable.

pub mod matcher;

pub use matcher::{MatchStrategy, Matcher};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::platform::{self, Escalation, ProcessSignals};

/// How often [`ProcessManager::terminate_pid`] re-checks whether a process is gone.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A live OS process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process id.
    pub pid: u32,
    /// Full executable path, when the OS reports one.
    pub path: Option<PathBuf>,
    /// Process name as reported by the OS.
    pub name: String,
}

impl ProcessInfo {
    /// File name of the executable, falling back to the process name.
    pub fn executable(&self) -> String {
        self.path
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Termination failure for a single pid.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The pid cannot name a single process.
    #[error("invalid pid {0}")]
    InvalidPid(u32),

    /// No live process has this pid.
    #[error("no process with pid {0}")]
    NotRunning(u32),

    /// The OS refused the terminate or kill request.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Source of the live process list.
pub trait ProcessTable: Send + Sync {
    /// Every live process.
    ///
    /// # Errors
    ///
    /// Returns an error when the process table cannot be read.
    fn list(&self) -> io::Result<Vec<ProcessInfo>>;
}

/// [`ProcessTable`] backed by the OS through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );
        Ok(system
            .processes()
            .iter()
            .filter(|(_, p)| p.status() != ProcessStatus::Zombie)
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                path: p.exe().map(PathBuf::from),
                name: p.name().to_string_lossy().into_owned(),
            })
            .collect())
    }
}

/// Finds processes with a [`ProcessTable`] and stops them with [`ProcessSignals`].
#[derive(Clone)]
pub struct ProcessManager {
    table: Arc<dyn ProcessTable>,
    signals: Arc<dyn ProcessSignals>,
}

impl ProcessManager {
    /// Create a manager over the given table and signaller.
    pub fn new(table: Arc<dyn ProcessTable>, signals: Arc<dyn ProcessSignals>) -> Self {
        Self { table, signals }
    }

    /// Manager over the real OS process table.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemProcessTable), platform::os_signals())
    }

    /// The signaller used to stop processes.
    pub fn signals(&self) -> &dyn ProcessSignals {
        self.signals.as_ref()
    }

    fn matching(&self, matcher: &Matcher) -> Vec<ProcessInfo> {
        match self.table.list() {
            Ok(processes) => processes.into_iter().filter(|p| matcher.matches(p)).collect(),
            Err(e) => {
                warn!(error = %e, "error listing processes");
                Vec::new()
            }
        }
    }

    /// Pids of every process selected by `matcher`, right now.
    pub fn find_pids(&self, matcher: &Matcher) -> Vec<u32> {
        self.matching(matcher).into_iter().map(|p| p.pid).collect()
    }

    /// Poll the process table until `matcher` selects at least one process or
    /// `timeout` elapses. A zero `poll_interval` checks exactly once.
    pub async fn find_processes(
        &self,
        matcher: &Matcher,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Vec<ProcessInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.matching(matcher);
            if !found.is_empty() || poll_interval.is_zero() {
                return found;
            }
            if Instant::now() + poll_interval > deadline {
                debug!(pattern = matcher.pattern(), "no matching process before timeout");
                return found;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Ask `pid` to exit, wait up to `min(1s, timeout)`, then kill it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidPid`] or [`ProcessError::NotRunning`]
    /// without signalling anything, and [`ProcessError::Signal`] when the OS
    /// refuses the terminate request or the follow-up kill.
    pub async fn terminate_pid(&self, pid: u32, timeout: Duration) -> Result<(), ProcessError> {
        if pid == 0 || i32::try_from(pid).is_err() {
            return Err(ProcessError::InvalidPid(pid));
        }
        if !self.signals.is_running(pid) {
            return Err(ProcessError::NotRunning(pid));
        }

        info!(pid, "terminating");
        self.signals
            .request_stop(pid)
            .map_err(|source| ProcessError::Signal { pid, source })?;

        let signals = self.signals.as_ref();
        let wait = platform::terminate_wait(timeout);
        let exited = platform::until_exited(signals, pid, EXIT_POLL_INTERVAL);
        match platform::wait_or_kill(signals, pid, wait, exited).await {
            Escalation::Terminated | Escalation::Killed => Ok(()),
            Escalation::KillFailed => Err(ProcessError::Signal {
                pid,
                source: io::Error::other("kill failed"),
            }),
        }
    }

    /// Terminate every process selected by `matcher` and return the pids
    /// that were targeted.
    ///
    /// Best effort: failures are logged and the pid is still returned. A
    /// returned pid is not a guarantee that the process has exited.
    pub async fn terminate_all(&self, matcher: &Matcher, timeout: Duration) -> Vec<u32> {
        let pids = self.find_pids(matcher);
        if pids.is_empty() {
            return pids;
        }
        info!(pattern = matcher.pattern(), ?pids, "terminating all");
        for &pid in &pids {
            if let Err(e) = self.terminate_pid(pid, timeout).await {
                warn!(pid, error = %e, "error terminating process");
            }
        }
        pids
    }
}

/// [`ProcessManager::find_processes`] over the OS process table.
pub async fn find_processes(
    matcher: &Matcher,
    timeout: Duration,
    poll_interval: Duration,
) -> Vec<ProcessInfo> {
    ProcessManager::system()
        .find_processes(matcher, timeout, poll_interval)
        .await
}

/// [`ProcessManager::terminate_pid`] for an OS process.
///
/// # Errors
///
/// See [`ProcessManager::terminate_pid`].
pub async fn terminate_pid(pid: u32, timeout: Duration) -> Result<(), ProcessError> {
    ProcessManager::system().terminate_pid(pid, timeout).await
}

/// [`ProcessManager::terminate_all`] over the OS process table.
pub async fn terminate_all(matcher: &Matcher, timeout: Duration) -> Vec<u32> {
    ProcessManager::system().terminate_all(matcher, timeout).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Table whose contents are set by the test; `None` makes listing fail.
    #[derive(Default)]
    struct FakeTable {
        processes: Mutex<Option<Vec<ProcessInfo>>>,
        lists: AtomicUsize,
    }

    impl FakeTable {
        fn with(processes: Vec<ProcessInfo>) -> Self {
            Self {
                processes: Mutex::new(Some(processes)),
                lists: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self::default()
        }
    }

    impl ProcessTable for FakeTable {
        fn list(&self) -> io::Result<Vec<ProcessInfo>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.processes
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| io::Error::other("ps failed"))
        }
    }

    /// Processes exit as soon as they are asked to, unless listed as stubborn.
    #[derive(Default)]
    struct FakeSignals {
        alive: Mutex<HashSet<u32>>,
        stubborn: HashSet<u32>,
        requested: Mutex<Vec<u32>>,
        forced: Mutex<Vec<u32>>,
    }

    impl FakeSignals {
        fn alive(pids: &[u32]) -> Self {
            Self {
                alive: Mutex::new(pids.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    impl ProcessSignals for FakeSignals {
        fn request_stop(&self, pid: u32) -> io::Result<()> {
            self.requested.lock().unwrap().push(pid);
            if !self.stubborn.contains(&pid) {
                self.alive.lock().unwrap().remove(&pid);
            }
            Ok(())
        }

        fn force_stop(&self, pid: u32) -> io::Result<()> {
            self.forced.lock().unwrap().push(pid);
            self.alive.lock().unwrap().remove(&pid);
            Ok(())
        }

        fn is_running(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    fn info(pid: u32, path: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            path: Some(PathBuf::from(path)),
            name: "svc".to_owned(),
        }
    }

    fn manager(table: FakeTable, signals: FakeSignals) -> (ProcessManager, Arc<FakeTable>, Arc<FakeSignals>) {
        let table = Arc::new(table);
        let signals = Arc::new(signals);
        (
            ProcessManager::new(table.clone(), signals.clone()),
            table,
            signals,
        )
    }

    #[test]
    fn executable_falls_back_to_name() {
        let p = ProcessInfo {
            pid: 1,
            path: None,
            name: "launchd".to_owned(),
        };
        assert_eq!(p.executable(), "launchd");
        assert_eq!(info(2, "/opt/app/svc-bin").executable(), "svc-bin");
    }

    #[test]
    fn listing_failure_finds_nothing() {
        let (mgr, _, _) = manager(FakeTable::failing(), FakeSignals::default());
        let matcher = Matcher::new("/opt/app/svc", MatchStrategy::PathEqual);
        assert!(mgr.find_pids(&matcher).is_empty());
    }

    #[tokio::test]
    async fn zero_poll_interval_checks_once() {
        let (mgr, table, _) = manager(FakeTable::with(Vec::new()), FakeSignals::default());
        let matcher = Matcher::new("/opt/app/svc", MatchStrategy::PathEqual);
        let found = mgr
            .find_processes(&matcher, Duration::from_secs(5), Duration::ZERO)
            .await;
        assert!(found.is_empty());
        assert_eq!(table.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn find_processes_gives_up_at_timeout() {
        let (mgr, table, _) = manager(FakeTable::with(Vec::new()), FakeSignals::default());
        let matcher = Matcher::new("/opt/app/svc", MatchStrategy::PathEqual);
        let found = mgr
            .find_processes(&matcher, Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(found.is_empty());
        assert!(table.lists.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn invalid_pids_are_rejected_without_signalling() {
        let (mgr, _, signals) = manager(FakeTable::with(Vec::new()), FakeSignals::alive(&[0]));
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            let err = mgr.terminate_pid(pid, Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, ProcessError::InvalidPid(p) if p == pid));
        }
        assert!(signals.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_pid_is_not_running() {
        let (mgr, _, signals) = manager(FakeTable::with(Vec::new()), FakeSignals::default());
        let err = mgr.terminate_pid(4242, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotRunning(4242)));
        assert!(signals.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stubborn_process_is_killed() {
        let signals = FakeSignals {
            stubborn: HashSet::from([7]),
            ..FakeSignals::alive(&[7])
        };
        let (mgr, _, signals) = manager(FakeTable::with(Vec::new()), signals);
        mgr.terminate_pid(7, Duration::from_millis(30)).await.unwrap();
        assert_eq!(*signals.requested.lock().unwrap(), vec![7]);
        assert_eq!(*signals.forced.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn terminate_all_targets_only_matches() {
        let table = FakeTable::with(vec![
            info(10, "/opt/app/svc"),
            info(11, "/opt/app/svc"),
            info(12, "/opt/app/other"),
            info(13, "/opt/app/svc"),
        ]);
        let (mgr, _, signals) = manager(table, FakeSignals::alive(&[10, 11, 12, 13]));
        let matcher = Matcher::new("/opt/app/svc", MatchStrategy::PathEqual).except_pid(13);

        let mut pids = mgr.terminate_all(&matcher, Duration::from_secs(1)).await;
        pids.sort_unstable();
        assert_eq!(pids, vec![10, 11]);
        assert!(signals.is_running(12));
        assert!(signals.is_running(13));
        assert!(signals.forced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminate_all_with_failed_listing_is_empty() {
        let (mgr, _, _) = manager(FakeTable::failing(), FakeSignals::default());
        let matcher = Matcher::new("svc", MatchStrategy::ExecutableEqual);
        assert!(mgr.terminate_all(&matcher, Duration::from_millis(10)).await.is_empty());
    }

    #[test]
    fn system_table_lists_this_process() {
        let me = std::process::id();
        let processes = SystemProcessTable.list().unwrap();
        assert!(processes.iter().any(|p| p.pid == me));
    }
}
