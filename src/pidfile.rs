// SPDX-License-Identifier: MIT
//! Pidfile handling for the `start` / `stop` / `status` commands.

use std::io;
use std::path::{Path, PathBuf};

pub const PIDFILE: &str = "vigild.pid";

pub fn path(data_dir: &Path) -> PathBuf {
    data_dir.join(PIDFILE)
}

/// Record `pid` in the data directory, creating it if needed.
pub fn write(data_dir: &Path, pid: u32) -> io::Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    let path = path(data_dir);
    std::fs::write(&path, format!("{pid}\n"))?;
    Ok(path)
}

/// Read the recorded pid, if any.
pub fn read(data_dir: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path(data_dir)).ok()?;
    contents.trim().parse().ok()
}

pub fn remove(data_dir: &Path) {
    let _ = std::fs::remove_file(path(data_dir));
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    // POSIX: kill(pid, 0) returns 0 if the process exists and we may signal it.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    // Non-Unix platform — assume alive (conservative)
    true
}

/// Ask the process to shut down gracefully.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "stop-by-pid is not supported on this platform",
    ))
}
