/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Host-local device locks.
//!
//! A lock is a file created with `O_EXCL` holding the owner's PID.  The lock
//! is valid only while that process is alive: a lock left behind by a dead
//! process is removed and taken over by the next caller.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RETRIES: u32 = 10;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("lock {path} is held by another process")]
    Busy { path: PathBuf },
}

/// Whether a process with this PID exists.  Only `ESRCH` counts as dead;
/// `EPERM` means someone else's live process.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

/// `Ok(None)` when the file exists but does not (yet) hold a PID.
fn read_pid(path: &Path) -> io::Result<Option<i32>> {
    let text = fs::read_to_string(path)?;
    Ok(text.trim().parse().ok())
}

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    pid: i32,
    retries: u32,
    backoff: Duration,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id() as i32,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn try_create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        writeln!(file, "{:10}", self.pid)?;
        file.sync_all()
    }

    /// Takes the lock.  Returns `false` if a live process holds it or the
    /// retries ran out; `true` if it is now (or already was) ours.
    pub fn acquire(&self) -> Result<bool, LockError> {
        let mut attempts = 0;
        loop {
            match self.try_create() {
                Ok(()) => {
                    debug!(path = %self.path.display(), "lock acquired");
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(self.io_err(e)),
            }

            if attempts >= self.retries {
                return Ok(false);
            }
            attempts += 1;

            match read_pid(&self.path) {
                Ok(Some(owner)) if owner == self.pid => return Ok(true),
                Ok(Some(owner)) if process_alive(owner) => return Ok(false),
                Ok(Some(owner)) => {
                    warn!(path = %self.path.display(), owner, "removing stale lock");
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(self.io_err(e)),
                    }
                }
                // Being created or removed by someone else.
                Ok(None) => std::thread::sleep(self.backoff),
                Err(e) if e.kind() == io::ErrorKind::NotFound => std::thread::sleep(self.backoff),
                Err(e) => return Err(self.io_err(e)),
            }
        }
    }

    /// Removes the lock if this process owns it.
    pub fn release(&self) -> Result<bool, LockError> {
        if !self.owns_lock() {
            return Ok(false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "lock released");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Held by any live process, including this one.
    pub fn is_locked(&self) -> bool {
        matches!(read_pid(&self.path), Ok(Some(pid)) if process_alive(pid))
    }

    pub fn owns_lock(&self) -> bool {
        matches!(read_pid(&self.path), Ok(Some(pid)) if pid == self.pid)
    }

    /// Acquires and wraps the lock in a guard that releases it on drop.
    pub fn lock(self) -> Result<LockGuard, LockError> {
        if self.acquire()? {
            Ok(LockGuard { lock: self })
        } else {
            Err(LockError::Busy {
                path: self.path.clone(),
            })
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
    }
}

/// Held device lock.
#[derive(Debug)]
pub struct LockGuard {
    lock: LockFile,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};

    fn quick(path: &Path) -> LockFile {
        LockFile::new(path).with_backoff(Duration::from_millis(10))
    }

    fn sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().unwrap()
    }

    fn write_owner(path: &Path, pid: u32) {
        fs::write(path, format!("{:10}\n", pid)).unwrap();
    }

    #[test]
    fn acquire_writes_padded_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.lock");
        let lock = quick(&path);
        assert!(lock.acquire().unwrap());
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.len(), 11);
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
        assert!(lock.owns_lock());
        assert!(lock.is_locked());
    }

    #[test]
    fn reacquire_by_owner_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let lock = quick(&dir.path().join("port.lock"));
        assert!(lock.acquire().unwrap());
        assert!(lock.acquire().unwrap());
    }

    #[test]
    fn live_owner_blocks_then_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.lock");
        let mut owner = sleeper();
        write_owner(&path, owner.id());

        let lock = quick(&path);
        assert!(!lock.acquire().unwrap());
        assert!(lock.is_locked());
        assert!(!lock.owns_lock());

        owner.kill().unwrap();
        owner.wait().unwrap();

        assert!(!lock.is_locked());
        assert!(lock.acquire().unwrap());
        assert!(lock.owns_lock());
    }

    #[test]
    fn release_leaves_foreign_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.lock");
        let mut owner = sleeper();
        write_owner(&path, owner.id());

        let lock = quick(&path);
        assert!(!lock.release().unwrap());
        assert!(path.exists());

        owner.kill().unwrap();
        owner.wait().unwrap();
    }

    #[test]
    fn guard_and_drop_release_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.lock");
        {
            let guard = quick(&path).lock().unwrap();
            assert!(guard.path().exists());
        }
        assert!(!path.exists());

        {
            let lock = quick(&path);
            assert!(lock.acquire().unwrap());
        }
        assert!(!path.exists());
    }

    #[test]
    fn empty_lock_file_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.lock");
        fs::write(&path, "").unwrap();
        let lock = quick(&path).with_retries(2);
        assert!(!lock.acquire().unwrap());
        assert!(path.exists());
    }
}
