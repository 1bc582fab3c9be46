// Daemon lifecycle management
//
// PID file at <data_dir>/fryler.pid, process existence checks,
// and SIGTERM/SIGKILL shutdown from `fryler stop`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::constants::STOP_GRACE_SECS;

/// How `stop_daemon` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live process (a stale PID file is removed)
    NotRunning,
    /// Exited after SIGTERM
    Stopped(u32),
    /// Needed SIGKILL
    Killed(u32),
}

/// Manages daemon lifecycle (PID file, shutdown)
pub struct DaemonLifecycle {
    pid_file: PathBuf,
}

impl DaemonLifecycle {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    /// Claim the PID file for this process.
    ///
    /// Fails if another live daemon owns it; a stale file is replaced.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            let pid = self.read_pid()?;
            bail!("fryler daemon is already running (pid {})", pid);
        }
        if self.pid_file.exists() {
            warn!("Removing stale PID file {}", self.pid_file.display());
            self.cleanup()?;
        }
        self.write_pid()
    }

    /// Write current process PID to file
    pub fn write_pid(&self) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let pid = std::process::id();
        fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write PID file: {}", self.pid_file.display()))?;
        info!(pid = pid, path = %self.pid_file.display(), "Daemon PID file written");
        Ok(())
    }

    /// Remove PID file (called on shutdown)
    pub fn cleanup(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).with_context(|| {
                format!("Failed to remove PID file: {}", self.pid_file.display())
            })?;
            info!("Daemon PID file removed");
        }
        Ok(())
    }

    /// PID file present, parseable, and naming a live process
    pub fn is_running(&self) -> bool {
        if !self.pid_file.exists() {
            return false;
        }

        match self.read_pid() {
            Ok(pid) => process_exists(pid),
            Err(_) => false,
        }
    }

    /// Live daemon PID, if any
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().ok().filter(|pid| process_exists(*pid))
    }

    pub fn read_pid(&self) -> Result<u32> {
        let pid_str = fs::read_to_string(&self.pid_file)
            .with_context(|| format!("Failed to read PID file: {}", self.pid_file.display()))?;
        let pid: u32 = pid_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid PID in file: {}", pid_str.trim()))?;
        // 0 and anything past i32::MAX address process groups, not one process
        if pid == 0 || i32::try_from(pid).is_err() {
            bail!("PID out of range in file: {}", pid);
        }
        Ok(pid)
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// SIGTERM, wait for the grace period, then SIGKILL
    pub fn stop_daemon(&self) -> Result<StopOutcome> {
        if !self.pid_file.exists() {
            info!("Daemon not running (PID file does not exist)");
            return Ok(StopOutcome::NotRunning);
        }

        let pid = match self.read_pid() {
            Ok(p) => p,
            Err(e) => {
                warn!("Stale PID file exists but cannot read: {}. Removing...", e);
                self.cleanup()?;
                return Ok(StopOutcome::NotRunning);
            }
        };

        if !process_exists(pid) {
            info!(pid = pid, "Daemon not running. Removing stale PID file...");
            self.cleanup()?;
            return Ok(StopOutcome::NotRunning);
        }

        info!(pid = pid, "Stopping daemon with SIGTERM...");
        terminate(pid, Duration::from_secs(STOP_GRACE_SECS)).map(|forced| {
            // The daemon removes its own PID file on a clean exit
            if let Err(e) = self.cleanup() {
                warn!("{:#}", e);
            }
            if forced {
                StopOutcome::Killed(pid)
            } else {
                StopOutcome::Stopped(pid)
            }
        })
    }
}

/// Returns `true` if SIGKILL was needed
#[cfg(unix)]
fn terminate(pid: u32, grace: Duration) -> Result<bool> {
    use nix::sys::signal::{kill, Signal};
    use std::time::Instant;

    let target = single_process(pid).with_context(|| format!("Refusing to signal pid {}", pid))?;
    kill(target, Signal::SIGTERM).context("Failed to send SIGTERM to daemon")?;

    let start = Instant::now();
    while start.elapsed() < grace {
        if !process_exists(pid) {
            info!(pid = pid, "Daemon stopped gracefully");
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    warn!(pid = pid, "Daemon did not stop gracefully, sending SIGKILL...");
    kill(target, Signal::SIGKILL).context("Failed to send SIGKILL to daemon")?;
    std::thread::sleep(Duration::from_millis(500));

    if process_exists(pid) {
        bail!("Failed to stop daemon (process {} still running)", pid);
    }
    info!(pid = pid, "Daemon force-stopped with SIGKILL");
    Ok(true)
}

#[cfg(not(unix))]
fn terminate(pid: u32, _grace: Duration) -> Result<bool> {
    bail!("Stopping the daemon (pid {}) is only supported on Unix", pid)
}

/// A pid that names exactly one process (positive and within `pid_t`)
#[cfg(unix)]
fn single_process(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
}

/// kill(pid, 0) checks existence without sending a signal
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;

    match single_process(pid) {
        Some(target) => kill(target, None).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn process_exists(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new(),
    );
    system.process(Pid::from(pid as usize)).is_some()
}
