//! Integration tests: supervising real programs.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use updater::process::{MatchStrategy, Matcher, ProcessManager};
use updater::watchdog::{ExitPolicy, Program, WatchExit, Watchdog};

const GRACE: Duration = Duration::from_secs(30);

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    std::fs::canonicalize(path).expect("canonical path")
}

fn copy_sleep(dir: &Path, name: &str) -> PathBuf {
    let sleep = which::which("sleep").expect("sleep on PATH");
    let target = dir.join(name);
    std::fs::copy(&sleep, &target).expect("copy sleep");
    std::fs::canonicalize(target).expect("canonical path")
}

fn running(path: &Path) -> Vec<u32> {
    let matcher = Matcher::new(path.to_string_lossy(), MatchStrategy::PathEqual);
    ProcessManager::system().find_pids(&matcher)
}

async fn wait_until_running(path: &Path) {
    let matcher = Matcher::new(path.to_string_lossy(), MatchStrategy::PathEqual);
    let found = ProcessManager::system()
        .find_processes(&matcher, Duration::from_secs(10), Duration::from_millis(50))
        .await;
    assert!(!found.is_empty(), "{} never started", path.display());
}

#[tokio::test]
async fn failures_restart_until_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let count = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "flaky.sh",
        &format!(
            "echo run >> '{0}'\n[ $(wc -l < '{0}') -ge 3 ]",
            count.display()
        ),
    );

    let watchdog = Watchdog::new(
        vec![Program {
            path: script,
            args: Vec::new(),
            exit_on: ExitPolicy::OnSuccess,
        }],
        Duration::from_millis(20),
    );
    let exit = tokio::time::timeout(GRACE, watchdog.run())
        .await
        .expect("watchdog finishes")
        .expect("watchdog runs");

    assert_eq!(exit, WatchExit::AllStopped);
    let runs = std::fs::read_to_string(&count).expect("count file");
    assert_eq!(runs.lines().count(), 3);
}

#[tokio::test]
async fn clean_exit_with_all_policy_stops_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = copy_sleep(dir.path(), "updater-watchdog-service");
    let app = write_script(dir.path(), "app.sh", "sleep 1\nexit 0");

    let watchdog = Watchdog::new(
        vec![
            Program {
                path: service.clone(),
                args: vec!["60".to_owned()],
                exit_on: ExitPolicy::None,
            },
            Program {
                path: app.clone(),
                args: Vec::new(),
                exit_on: ExitPolicy::AllOnSuccess,
            },
        ],
        Duration::from_millis(20),
    );
    let exit = tokio::time::timeout(GRACE, watchdog.run())
        .await
        .expect("watchdog finishes")
        .expect("watchdog runs");

    assert_eq!(exit, WatchExit::ExitAll { program: app });
    assert!(running(&service).is_empty(), "service was stopped");
}

#[tokio::test]
async fn cancel_stops_programs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = copy_sleep(dir.path(), "updater-watchdog-cancel");

    let watchdog = Arc::new(Watchdog::new(
        vec![Program {
            path: service.clone(),
            args: vec!["60".to_owned()],
            exit_on: ExitPolicy::None,
        }],
        Duration::from_millis(20),
    ));
    let cancel = watchdog.cancel_token();
    let task = tokio::spawn({
        let watchdog = watchdog.clone();
        async move { watchdog.run().await }
    });

    wait_until_running(&service).await;
    cancel.cancel();
    let exit = tokio::time::timeout(GRACE, task)
        .await
        .expect("watchdog finishes")
        .expect("task joins")
        .expect("watchdog runs");

    assert_eq!(exit, WatchExit::AllStopped);
    assert!(running(&service).is_empty());
}

#[tokio::test]
async fn missing_program_keeps_retrying_until_cancelled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watchdog = Arc::new(Watchdog::new(
        vec![Program {
            path: dir.path().join("does-not-exist"),
            args: Vec::new(),
            exit_on: ExitPolicy::OnSuccess,
        }],
        Duration::from_millis(20),
    ));
    let cancel = watchdog.cancel_token();
    let task = tokio::spawn({
        let watchdog = watchdog.clone();
        async move { watchdog.run().await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished(), "a spawn failure counts as a failed run");
    cancel.cancel();
    let exit = tokio::time::timeout(GRACE, task)
        .await
        .expect("watchdog finishes")
        .expect("task joins")
        .expect("watchdog runs");
    assert_eq!(exit, WatchExit::AllStopped);
}

#[tokio::test]
async fn stale_instances_are_terminated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = copy_sleep(dir.path(), "updater-watchdog-stale");
    let mut stale = loop {
        match std::process::Command::new(&service).arg("60").spawn() {
            Ok(child) => break child,
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("spawn: {e}"),
        }
    };
    wait_until_running(&service).await;

    let watchdog = Watchdog::new(
        vec![Program {
            path: service,
            args: Vec::new(),
            exit_on: ExitPolicy::None,
        }],
        Duration::from_secs(1),
    );
    let killed = watchdog.terminate_existing().await;

    assert!(killed.contains(&stale.id()));
    assert_eq!(stale.wait().expect("wait").signal(), Some(libc::SIGTERM));
}
