// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-instance enforcement through a PID file in the config store.

use anyhow::{Context, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name inside the config store.
pub const PID_FILE: &str = "seller.pid";

/// Holds the PID file for the process lifetime; removed on drop and on the
/// supervisor's signal/error exit paths.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current PID into `<config_dir>/seller.pid`.
    ///
    /// Refuses when the file already names a live process. A file left behind
    /// by a dead process is replaced with a warning.
    pub fn acquire(config_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(config_dir)
            .with_context(|| format!("create config dir {}", config_dir.display()))?;
        let path = config_dir.join(PID_FILE);

        if let Ok(raw) = fs::read_to_string(&path) {
            match raw.trim().parse::<u32>() {
                Ok(pid) if pid_alive(pid) => {
                    bail!(
                        "another seller is already running (pid {pid}, recorded in {})",
                        path.display()
                    );
                }
                Ok(pid) => {
                    warn!(
                        target: "acp.supervisor",
                        pid,
                        path = %path.display(),
                        "replacing stale pid file"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "acp.supervisor",
                        path = %path.display(),
                        "replacing unreadable pid file"
                    );
                }
            }
        }

        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("write pid file {}", path.display()))?;
        Ok(Self { path })
    }

    /// The file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Without a portable liveness probe, any recorded PID counts as live.
#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_current_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = PidFile::acquire(tmp.path()).unwrap();
        let recorded = fs::read_to_string(guard.path()).unwrap();
        assert_eq!(recorded, std::process::id().to_string());
    }

    #[test]
    fn drop_removes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = {
            let guard = PidFile::acquire(tmp.path()).unwrap();
            guard.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn refuses_when_live_pid_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        // Our own PID is certainly alive.
        fs::write(tmp.path().join(PID_FILE), std::process::id().to_string()).unwrap();
        let err = PidFile::acquire(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn replaces_stale_pid() {
        let tmp = tempfile::tempdir().unwrap();
        // PID 0 is never a valid userspace process.
        fs::write(tmp.path().join(PID_FILE), "0").unwrap();
        let guard = PidFile::acquire(tmp.path()).unwrap();
        let recorded = fs::read_to_string(guard.path()).unwrap();
        assert_eq!(recorded, std::process::id().to_string());
    }

    #[test]
    fn replaces_garbage_pid_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PID_FILE), "not a pid").unwrap();
        assert!(PidFile::acquire(tmp.path()).is_ok());
    }
}
