//! Deadline-bounded execution of external programs.
//!
//! [`exec`] runs a program, captures its stdout and stderr, and races the
//! exit against a timeout. When the timeout wins, the process is asked to stop
//! (`SIGTERM` on Unix), given `min(1s, timeout)` to comply, and then killed.
//! A timeout is always reported as [`CommandError::TimedOut`], whether or not
//! the kill itself worked.

use std::borrow::Cow;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::platform::{self, Escalation, ProcessSignals};

/// A program at a path with arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Executable path (or name resolved via `PATH`).
    pub path: String,
    /// Arguments passed before any call-specific ones.
    pub args: Vec<String>,
}

impl Program {
    /// Returns the program's own arguments followed by `args`.
    pub fn args_with(&self, args: &[String]) -> Vec<String> {
        let mut all = self.args.clone();
        all.extend_from_slice(args);
        all
    }
}

/// Captured output of a finished (or timed-out) command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Everything the process wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything the process wrote to stderr.
    pub stderr: Vec<u8>,
    /// OS process id, kept for post-mortem inspection.
    pub pid: Option<u32>,
    /// Exit status, if the process was reaped.
    pub status: Option<ExitStatus>,
}

impl CommandOutput {
    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded lossily as UTF-8.
    pub fn stderr_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Stdout and stderr as a single string, omitting empty streams.
    pub fn combined_output(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        let stdout = self.stdout_str();
        if !stdout.is_empty() {
            parts.push(format!("[stdout]: {stdout}"));
        }
        let stderr = self.stderr_str();
        if !stderr.is_empty() {
            parts.push(format!("[stderr]: {stderr}"));
        }
        parts.join(", ")
    }
}

/// Errors from running an external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No program was given.
    #[error("no command")]
    EmptyCommand,

    /// The process could not be started (e.g. executable not found).
    #[error("failed to start {command}: {source}")]
    Spawn {
        /// Program that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed.
    #[error("failed waiting for {command}: {source}")]
    Wait {
        /// Program being waited on.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process ran to completion with a failing status.
    #[error("{command} failed: {status}")]
    Exit {
        /// Program that failed.
        command: String,
        /// The failing status.
        status: ExitStatus,
        /// Whatever the process wrote before exiting.
        output: Box<CommandOutput>,
    },

    /// The deadline passed before the process exited.
    #[error("timed out")]
    TimedOut {
        /// Program that timed out.
        command: String,
        /// The deadline that was exceeded.
        timeout: Duration,
        /// Whatever the process wrote before it was stopped.
        output: Box<CommandOutput>,
    },

    /// The command succeeded but its output was not the expected JSON.
    #[error("error in result: {0}")]
    Decode(String),
}

impl CommandError {
    /// Captured output, when the process got far enough to produce any.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Exit { output, .. } | Self::TimedOut { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Returns `true` if the deadline was exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Runs commands, escalating through [`ProcessSignals`] on timeout.
#[derive(Clone)]
pub struct Executor {
    signals: Arc<dyn ProcessSignals>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(platform::os_signals())
    }
}

impl Executor {
    /// Create an executor that stops timed-out processes through `signals`.
    pub fn new(signals: Arc<dyn ProcessSignals>) -> Self {
        Self { signals }
    }

    /// Run `path` with `args`, optionally replacing the environment.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::EmptyCommand`] or [`CommandError::Spawn`] before
    /// any process runs, [`CommandError::Exit`] for a failing exit status, and
    /// [`CommandError::TimedOut`] when `timeout` elapses first.
    pub async fn run(
        &self,
        path: &str,
        args: &[String],
        env: Option<&[(String, String)]>,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        if path.is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        debug!(command = path, ?args, "execute");

        let mut command = Command::new(path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = env {
            command.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            command: path.to_owned(),
            source,
        })?;
        let pid = child.id();
        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

        if let Ok(waited) = tokio::time::timeout(timeout, child.wait()).await {
            let status = waited.map_err(|source| CommandError::Wait {
                command: path.to_owned(),
                source,
            })?;
            let output = CommandOutput {
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
                pid,
                status: Some(status),
            };
            debug!(command = path, %status, "executed");
            if status.success() {
                return Ok(output);
            }
            return Err(CommandError::Exit {
                command: path.to_owned(),
                status,
                output: Box::new(output),
            });
        }

        let wait = platform::terminate_wait(timeout);
        warn!(command = path, ?wait, "command timed out, terminating");
        if let Some(pid) = pid {
            let outcome = platform::escalate(self.signals.as_ref(), pid, wait, async {
                let _ = child.wait().await;
            })
            .await;
            if outcome == Escalation::KillFailed {
                // The OS may refuse a signal for an exited-but-unreaped child.
                let _ = child.start_kill();
            }
        }

        // Reap so the process does not linger as a zombie.
        let status = match tokio::time::timeout(wait, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => None,
        };
        let output = CommandOutput {
            stdout: collect_within(stdout, wait).await,
            stderr: collect_within(stderr, wait).await,
            pid,
            status,
        };
        Err(CommandError::TimedOut {
            command: path.to_owned(),
            timeout,
            output: Box::new(output),
        })
    }
}

/// Run a command and return its output.
///
/// # Errors
///
/// See [`Executor::run`].
pub async fn exec(
    path: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    Executor::default().run(path, args, None, timeout).await
}

/// Run a command with exactly the given environment.
///
/// # Errors
///
/// See [`Executor::run`].
pub async fn exec_with_env(
    path: &str,
    args: &[String],
    env: &[(String, String)],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    Executor::default().run(path, args, Some(env), timeout).await
}

/// Run a command and decode the first JSON value it prints on stdout.
///
/// Anything after that first value is ignored.
///
/// # Errors
///
/// Execution failures are returned as-is; a missing or malformed value is
/// [`CommandError::Decode`].
pub async fn exec_for_json<T: DeserializeOwned>(
    path: &str,
    args: &[String],
    timeout: Duration,
) -> Result<T, CommandError> {
    let output = exec(path, args, timeout).await?;
    decode_first(&output.stdout)
}

/// Decode the first JSON value in `bytes`.
pub(crate) fn decode_first<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CommandError> {
    let mut values = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(CommandError::Decode(e.to_string())),
        None => Err(CommandError::Decode("no JSON value in output".to_owned())),
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "error reading command output");
    }
    buf
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Like [`collect`], but gives up if a surviving grandchild keeps the pipe open.
async fn collect_within(reader: Option<JoinHandle<Vec<u8>>>, wait: Duration) -> Vec<u8> {
    let Some(handle) = reader else {
        return Vec::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(wait, handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}
