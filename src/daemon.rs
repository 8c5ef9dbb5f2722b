//! Process lifecycle for the launcher
//!
//! PID file handling keyed by the listening port, `--stop` / `--status`
//! queries against that PID, and detaching from the terminal in daemon mode.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of liveness checks after SIGTERM before escalating
const STOP_POLL_ATTEMPTS: u32 = 10;

/// Delay between liveness checks
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// PID file path for a listening port
pub fn pid_file_path(port: u16) -> PathBuf {
    PathBuf::from(format!("/tmp/linebal_{}.pid", port))
}

/// Default log file in daemon mode
pub fn default_log_file(port: u16) -> PathBuf {
    PathBuf::from(format!("/var/log/linebal_{}.log", port))
}

/// Log file used when the requested one cannot be opened
pub fn fallback_log_file(port: u16) -> PathBuf {
    PathBuf::from(format!("/tmp/linebal_{}.log", port))
}

/// The log file an instance on `port` is writing to, if one exists
///
/// Only checks the default and fallback paths; nothing is created.
pub fn existing_log_file(port: u16) -> Option<PathBuf> {
    [default_log_file(port), fallback_log_file(port)]
        .into_iter()
        .find(|path| path.is_file())
}

/// An opened, append-mode log file
#[derive(Debug)]
pub struct LogFile {
    /// Path actually opened
    pub path: PathBuf,
    /// Path that was asked for
    pub requested: PathBuf,
    /// The open handle
    pub file: File,
}

impl LogFile {
    /// Whether the fallback path was used
    pub fn fell_back(&self) -> bool {
        self.path != self.requested
    }
}

/// Open `path` for appending, falling back to `/tmp/linebal_<port>.log`
pub fn open_log_file(path: &Path, port: u16) -> Result<LogFile> {
    open_log_file_or(path, &fallback_log_file(port))
}

/// Open `path` for appending, or `fallback` if `path` is not writable
///
/// Missing parent directories are created. Fails only when neither path
/// can be opened.
pub fn open_log_file_or(path: &Path, fallback: &Path) -> Result<LogFile> {
    let requested = path.to_path_buf();
    let (path, file) = match open_append(path) {
        Ok(file) => (requested.clone(), file),
        Err(primary) => {
            let file = open_append(fallback).with_context(|| {
                format!(
                    "Failed to open log file {:?} ({}) or fallback {:?}",
                    requested, primary, fallback
                )
            })?;
            (fallback.to_path_buf(), file)
        }
    };

    Ok(LogFile {
        path,
        requested,
        file,
    })
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

/// PID file that is removed when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file: {:?}", path))?;
        debug!("PID file: {:?}", path);
        Ok(PidFile { path })
    }

    /// Path of the PID file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove PID file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Read a PID from `path`
pub fn read_pid<P: AsRef<Path>>(path: P) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Process is alive
    Running(i32),
    /// No PID file
    NotRunning,
    /// PID file pointed at a dead process and was removed
    Stale(i32),
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No PID file for this port
    NotRunning,
    /// Exited after SIGTERM
    Stopped(i32),
    /// Had to be killed
    Killed(i32),
}

/// Query whether the balancer for `port` is running
pub fn status(port: u16) -> Status {
    status_at(&pid_file_path(port))
}

/// Query a specific PID file
pub fn status_at(path: &Path) -> Status {
    match read_pid(path) {
        None => Status::NotRunning,
        Some(pid) if is_alive(pid) => Status::Running(pid),
        Some(pid) => {
            let _ = fs::remove_file(path);
            Status::Stale(pid)
        }
    }
}

/// Stop the balancer for `port`
pub fn stop(port: u16) -> Result<StopOutcome> {
    let path = pid_file_path(port);
    let Some(pid) = read_pid(&path) else {
        return Ok(StopOutcome::NotRunning);
    };

    send_signal(pid, Signal::Terminate)
        .with_context(|| format!("Failed to signal process {}", pid))?;

    for _ in 0..STOP_POLL_ATTEMPTS {
        if !is_alive(pid) {
            return Ok(StopOutcome::Stopped(pid));
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    send_signal(pid, Signal::Kill).with_context(|| format!("Failed to kill process {}", pid))?;
    let _ = fs::remove_file(&path);
    Ok(StopOutcome::Killed(pid))
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: Signal) -> std::io::Result<()> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill has no memory-safety preconditions
    if unsafe { libc::kill(pid, signo) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: i32, _signal: Signal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on unix",
    ))
}

/// Whether a process with this id exists
#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only performs the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with this id exists
#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

/// Detach from the controlling terminal
///
/// Double fork with `setsid` in between, `chdir /`, `umask 0`, and stdio
/// redirected to `/dev/null`. Must run before the async runtime starts since
/// only the calling thread survives a fork. The parent process and the
/// intermediate child exit here.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use std::os::unix::io::AsRawFd;

    fork_and_exit_parent().context("First fork failed")?;

    // SAFETY: plain syscalls without pointer arguments
    unsafe {
        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error()).context("setsid failed");
        }
        libc::umask(0);
    }
    std::env::set_current_dir("/").context("Failed to chdir to /")?;

    fork_and_exit_parent().context("Second fork failed")?;

    let devnull = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Failed to open /dev/null")?;
    let fd = devnull.as_raw_fd();
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(std::io::Error::last_os_error()).context("dup2 failed");
        }
    }

    Ok(())
}

#[cfg(unix)]
fn fork_and_exit_parent() -> std::io::Result<()> {
    // SAFETY: called while the process is still single-threaded
    match unsafe { libc::fork() } {
        -1 => Err(std::io::Error::last_os_error()),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

/// Detach from the controlling terminal
#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    anyhow::bail!("daemon mode is only supported on unix")
}
