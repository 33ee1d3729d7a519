//! Keeps a fixed set of programs running.
//!
//! On startup, stale instances of every program (other copies started by an
//! earlier or concurrent watchdog) are terminated. Then each program gets its
//! own monitoring task that launches it, waits for it to exit, and decides
//! from its [`ExitPolicy`] whether to restart it, leave it stopped, or shut
//! everything down.
//!
//! The watchdog never exits the process itself. A clean exit of an
//! [`ExitPolicy::AllOnSuccess`] program stops the other programs and makes
//! [`Watchdog::run`] return [`WatchExit::ExitAll`]; the caller decides what
//! to do next.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::platform::{self, MAX_TERMINATE_WAIT};
use crate::process::{MatchStrategy, Matcher, ProcessManager};

/// Kill passes made over existing instances at startup.
const TERMINATE_PASSES: usize = 3;

/// Pause between kill passes, long enough for a racing watchdog to have
/// started its copy.
const TERMINATE_SETTLE: Duration = Duration::from_millis(200);

/// What a clean (zero status) exit of a program means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitPolicy {
    /// Always restart.
    #[default]
    #[serde(rename = "none", alias = "")]
    None,
    /// Stop watching this program; restart only after failures.
    #[serde(rename = "success")]
    OnSuccess,
    /// Stop every program and end the watch; restart only after failures.
    #[serde(rename = "all")]
    AllOnSuccess,
}

/// A supervised program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Executable path.
    pub path: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// What a clean exit means.
    pub exit_on: ExitPolicy,
}

/// Why [`Watchdog::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchExit {
    /// `program` exited cleanly under [`ExitPolicy::AllOnSuccess`]; all other
    /// programs have been told to stop. The caller should exit.
    ExitAll {
        /// The program that triggered the shutdown.
        program: PathBuf,
    },
    /// Every program stopped under [`ExitPolicy::OnSuccess`].
    AllStopped,
}

/// Watchdog failure.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// There is nothing to supervise.
    #[error("no programs to watch")]
    NoPrograms,
}

/// What a monitoring loop does after its program exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Launch the program again.
    Restart,
    /// Stop monitoring this program.
    Stop,
    /// Shut down every program.
    ExitAll,
}

/// Decide what follows an exit. Failures always restart.
pub fn next_step(policy: ExitPolicy, success: bool) -> Step {
    match (success, policy) {
        (false, _) | (true, ExitPolicy::None) => Step::Restart,
        (true, ExitPolicy::OnSuccess) => Step::Stop,
        (true, ExitPolicy::AllOnSuccess) => Step::ExitAll,
    }
}

/// Crash-loop brake: if the program ran for less than `delay`, wait out
/// the rest of it before relaunching.
pub fn restart_wait(ran: Duration, delay: Duration) -> Option<Duration> {
    let rest = delay.saturating_sub(ran);
    (!rest.is_zero()).then_some(rest)
}

/// Supervises a set of [`Program`]s.
pub struct Watchdog {
    programs: Vec<Program>,
    restart_delay: Duration,
    processes: ProcessManager,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Watchdog for `programs`, restarting no more often than `restart_delay`.
    pub fn new(programs: Vec<Program>, restart_delay: Duration) -> Self {
        Self {
            programs: programs.into_iter().map(resolve).collect(),
            restart_delay,
            processes: ProcessManager::system(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `processes` to find and stop programs.
    #[must_use]
    pub fn with_process_manager(mut self, processes: ProcessManager) -> Self {
        self.processes = processes;
        self
    }

    /// Token that stops every monitoring loop (and its program) when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The programs, with paths resolved.
    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Terminate running instances of every program, other than ourselves.
    ///
    /// Repeats up to three times, 200ms apart, while a pass still finds
    /// something, so a copy started by a concurrent watchdog mid-pass is
    /// caught too. Returns every pid targeted.
    pub async fn terminate_existing(&self) -> Vec<u32> {
        info!("terminating existing programs");
        let me = std::process::id();
        let mut all = Vec::new();
        for pass in 1..=TERMINATE_PASSES {
            let mut killed = Vec::new();
            for program in &self.programs {
                let matcher = Matcher::new(program.path.to_string_lossy(), MatchStrategy::PathEqual)
                    .except_pid(me);
                killed.extend(self.processes.terminate_all(&matcher, MAX_TERMINATE_WAIT).await);
            }
            if killed.is_empty() {
                info!("none of these programs are running");
                break;
            }
            info!(pass, pids = ?killed, "terminated pids");
            all.extend(killed);
            tokio::time::sleep(TERMINATE_SETTLE).await;
        }
        all
    }

    /// Supervise until every program has stopped for good, or one triggers
    /// [`ExitPolicy::AllOnSuccess`], or the cancel token fires (which also
    /// returns [`WatchExit::AllStopped`]).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoPrograms`] if there is nothing to watch.
    pub async fn run(&self) -> Result<WatchExit, WatchError> {
        if self.programs.is_empty() {
            return Err(WatchError::NoPrograms);
        }
        self.terminate_existing().await;

        let (exit_tx, mut exit_rx) = mpsc::channel(self.programs.len());
        let mut loops = JoinSet::new();
        for program in self.programs.iter().cloned() {
            loops.spawn(watch_program(
                program,
                self.restart_delay,
                self.processes.clone(),
                self.cancel.clone(),
                exit_tx.clone(),
            ));
        }
        drop(exit_tx);

        let exit = loop {
            tokio::select! {
                biased;
                Some(program) = exit_rx.recv() => break WatchExit::ExitAll { program },
                joined = loops.join_next() => match joined {
                    None => {
                        break match exit_rx.try_recv() {
                            Ok(program) => WatchExit::ExitAll { program },
                            Err(_) => WatchExit::AllStopped,
                        };
                    }
                    Some(Err(e)) => warn!(error = %e, "monitoring task failed"),
                    Some(Ok(())) => {}
                },
            }
        };

        if let WatchExit::ExitAll { program } = &exit {
            info!(program = %program.display(), "program exited on success, stopping all");
            self.stop_all(&mut loops).await;
        }
        Ok(exit)
    }

    async fn stop_all(&self, loops: &mut JoinSet<()>) {
        self.cancel.cancel();
        let grace = MAX_TERMINATE_WAIT * 2;
        if tokio::time::timeout(grace, async { while loops.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            warn!("monitoring tasks slow to stop, aborting");
            loops.abort_all();
        }
        self.terminate_existing().await;
    }
}

/// [`Watchdog::run`] for `programs`.
///
/// # Errors
///
/// See [`Watchdog::run`].
pub async fn watch(programs: Vec<Program>, restart_delay: Duration) -> Result<WatchExit, WatchError> {
    Watchdog::new(programs, restart_delay).run().await
}

/// Canonical path, so it compares equal to what the process table reports.
fn resolve(mut program: Program) -> Program {
    if let Ok(path) = std::fs::canonicalize(&program.path) {
        program.path = path;
    }
    program
}

async fn watch_program(
    program: Program,
    restart_delay: Duration,
    processes: ProcessManager,
    cancel: CancellationToken,
    exit_all: mpsc::Sender<PathBuf>,
) {
    loop {
        let started = Instant::now();
        let Some(success) = run_once(&program, &processes, &cancel).await else {
            return;
        };

        match next_step(program.exit_on, success) {
            Step::Restart => {}
            Step::Stop => {
                info!(path = %program.path.display(), "program configured to exit on success, not restarting");
                return;
            }
            Step::ExitAll => {
                info!(path = %program.path.display(), "program configured to exit on success, exiting all");
                if exit_all.send(program.path.clone()).await.is_err() {
                    warn!("watchdog no longer listening");
                }
                return;
            }
        }

        let ran = started.elapsed();
        info!(path = %program.path.display(), ?ran, "program ran");
        if let Some(wait) = restart_wait(ran, restart_delay) {
            info!(?wait, "waiting before starting program again");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }
    }
}

/// Launch `program` and wait for it. `Some(true)` for a clean exit,
/// `Some(false)` for a failure (including failing to start), `None` if
/// cancelled, in which case the program has been stopped.
async fn run_once(
    program: &Program,
    processes: &ProcessManager,
    cancel: &CancellationToken,
) -> Option<bool> {
    info!(path = %program.path.display(), args = ?program.args, "starting program");
    let mut child = match Command::new(&program.path)
        .args(&program.args)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!(path = %program.path.display(), error = %e, "error starting program");
            return Some(false);
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                info!(path = %program.path.display(), "program finished");
                Some(true)
            }
            Ok(status) => {
                error!(path = %program.path.display(), %status, "error running program");
                Some(false)
            }
            Err(e) => {
                error!(path = %program.path.display(), error = %e, "error waiting for program");
                Some(false)
            }
        },
        _ = cancel.cancelled() => {
            if let Some(pid) = child.id() {
                platform::escalate(processes.signals(), pid, MAX_TERMINATE_WAIT, async {
                    let _ = child.wait().await;
                })
                .await;
            }
            None
        }
    }
}
