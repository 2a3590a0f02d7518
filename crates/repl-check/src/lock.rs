//! Single-instance process lock.
//!
//! A PID file guards against two checkers writing the same checksum stores.
//! The file is created exclusively; one left behind by a dead process is
//! removed and creation retried.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};
use tracing::{debug, warn};

use crate::error::{CheckError, Result};

/// Held for the lifetime of a run; the file is removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    pid: u32,
}

impl ProcessLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pid = std::process::id();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // One retry after removing a stale file; losing that race means someone else holds it
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", pid)?;
                    file.sync_all()?;
                    debug!("Acquired lock {} (pid {})", path.display(), pid);
                    return Ok(Self { path, pid });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    remove_if_stale(&path, pid)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CheckError::Lock(format!(
            "{} was taken by another process while replacing a stale lock",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove lock {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Remove an existing lock file whose holder is gone. Errors when it is held.
fn remove_if_stale(path: &Path, pid: u32) -> Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        // Released between our create and read
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let held = |holder: String| {
        CheckError::Lock(format!("{} is held by {}", path.display(), holder))
    };

    match content.trim() {
        // Created but not yet written by its owner
        "" => return Err(held("a process still writing it".to_string())),
        text => match text.parse::<u32>() {
            Ok(holder) if holder == pid => return Err(held("this process".to_string())),
            Ok(holder) if is_running(holder) => {
                return Err(held(format!("running process {}", holder)))
            }
            Ok(holder) => warn!("Removing stale lock {} (pid {})", path.display(), holder),
            Err(_) => warn!("Removing unreadable lock {}", path.display()),
        },
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).is_some()
}
