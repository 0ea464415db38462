//! Single-instance guard for the supervisor binary.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// PID file that keeps two supervisors from managing the same sandbox.
///
/// The file is removed on drop once it has been written by this process.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    owned: bool,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether this handle wrote the file and will clean it up.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// PID recorded in the file, if there is one.
    pub fn read_pid(&self) -> Result<Option<u32>, SupervisorError> {
        let read_error = |reason: String| SupervisorError::PidFileRead {
            path: self.path.clone(),
            reason,
        };

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_error(e.to_string())),
        };

        contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| read_error(format!("Invalid PID format: {}", e)))
    }

    /// Record the current process.
    pub fn write_pid(&mut self) -> Result<(), SupervisorError> {
        self.write_pid_value(std::process::id())
    }

    pub fn write_pid_value(&mut self, pid: u32) -> Result<(), SupervisorError> {
        let create_error = |reason: String| SupervisorError::PidFileCreation {
            path: self.path.clone(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| create_error(format!("Failed to create parent directory: {}", e)))?;
        }
        fs::write(&self.path, pid.to_string()).map_err(|e| create_error(e.to_string()))?;

        self.owned = true;
        info!("PID file created: {} (PID: {})", self.path.display(), pid);
        Ok(())
    }

    pub fn remove(&mut self) -> Result<(), SupervisorError> {
        self.owned = false;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("PID file removed: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::PidFileRemoval {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Whether a process with `pid` is alive.
    #[cfg(unix)]
    pub fn is_process_running(pid: u32) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Some(Signal::SIGCONT)).is_ok()
    }

    #[cfg(not(unix))]
    pub fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Claim the file for this process, replacing a stale one.
    ///
    /// Fails with `AlreadyRunning` when the recorded process is alive.
    pub fn try_acquire(&mut self) -> Result<(), SupervisorError> {
        if let Some(pid) = self.read_pid()? {
            if Self::is_process_running(pid) {
                return Err(SupervisorError::AlreadyRunning {
                    path: self.path.clone(),
                    pid,
                });
            }
            warn!(
                "Removing stale PID file (PID {} not running): {}",
                pid,
                self.path.display()
            );
            self.remove()?;
        }

        self.write_pid()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.remove() {
                warn!("Failed to remove PID file on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
