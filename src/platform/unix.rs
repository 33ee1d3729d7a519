//! `SIGTERM` / `SIGKILL` signalling for Unix platforms.

use std::io;

use super::ProcessSignals;

/// Signals processes with `kill(2)`.
pub struct UnixSignals;

impl ProcessSignals for UnixSignals {
    fn request_stop(&self, pid: u32) -> io::Result<()> {
        send(pid, libc::SIGTERM)
    }

    fn force_stop(&self, pid: u32) -> io::Result<()> {
        send(pid, libc::SIGKILL)
    }

    fn is_running(&self, pid: u32) -> bool {
        super::is_listed(pid)
    }
}

fn send(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // Zero and values that wrap negative would address process groups.
    let target = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))
        })?;

    // SAFETY: kill(2) has no memory-safety preconditions; a positive pid
    // addresses exactly one process.
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
