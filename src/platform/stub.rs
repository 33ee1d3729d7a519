//! Signalling for platforms without a graceful stop signal.

use std::io;

use sysinfo::{Pid, ProcessesToUpdate, System};

use super::ProcessSignals;

/// Terminates processes outright for both the graceful and forced request.
///
/// Windows has no `SIGTERM` equivalent that a console-less child will honour,
/// so the graceful request is a kill as well.
pub struct KillOnlySignals;

impl ProcessSignals for KillOnlySignals {
    fn request_stop(&self, pid: u32) -> io::Result<()> {
        kill(pid)
    }

    fn force_stop(&self, pid: u32) -> io::Result<()> {
        kill(pid)
    }

    fn is_running(&self, pid: u32) -> bool {
        super::is_listed(pid)
    }
}

fn kill(pid: u32) -> io::Result<()> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) if process.kill() => Ok(()),
        Some(_) => Err(io::Error::other(format!("failed to kill pid {pid}"))),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no process with pid {pid}"),
        )),
    }
}
