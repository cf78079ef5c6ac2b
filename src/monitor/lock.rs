//! Process-wide cycle lock
//!
//! At most one cycle may touch the wallet at a time. The lock is a file
//! created exclusively and holding the owner's PID; a second process finds
//! it present and skips. Locks older than the staleness bound are assumed
//! to belong to a crashed process and are taken over.

use crate::monitor::clock::Sleeper;
use log::warn;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Default age after which a lock is considered abandoned
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Lock errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another cycle holds {path} (pid {pid})")]
    Held { path: String, pid: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Creates cycle locks at a fixed path
#[derive(Debug, Clone)]
pub struct CycleLock {
    path: PathBuf,
    stale_after: Duration,
}

/// A held lock; released on drop
#[derive(Debug)]
pub struct CycleLockGuard {
    path: PathBuf,
}

impl CycleLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting
    pub fn try_acquire(&self) -> Result<CycleLockGuard, LockError> {
        match self.create() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.is_stale() {
                    warn!(
                        "Taking over stale lock {} held by pid {}",
                        self.path.display(),
                        self.holder().unwrap_or_default()
                    );
                    fs::remove_file(&self.path)?;
                    return Ok(self.create()?);
                }
                Err(LockError::Held {
                    path: self.path.display().to_string(),
                    pid: self.holder().unwrap_or_default(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take the lock, retrying up to `attempts` times while it is held
    pub fn acquire_within(
        &self,
        attempts: u32,
        delay: Duration,
        sleeper: &dyn Sleeper,
    ) -> Result<CycleLockGuard, LockError> {
        let mut attempt = 1;
        loop {
            match self.try_acquire() {
                Err(LockError::Held { .. }) if attempt < attempts => {
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// PID recorded in the lock file, if any
    pub fn holder(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn create(&self) -> io::Result<CycleLockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(CycleLockGuard {
            path: self.path.clone(),
        })
    }

    fn is_stale(&self) -> bool {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }
}

impl Drop for CycleLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
