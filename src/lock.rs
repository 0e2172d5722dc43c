//! Lock Manager
//!
//! Cooperative single-writer lock for a flash device.
//!
//! The lock is a zero-length file `<lock_dir>/cal.<device basename>.lock`
//! created with create-exclusive semantics. Its existence is the whole
//! signal: a second `acquire` for the same device fails until the first
//! holder removes it. Processes that open the device without this protocol
//! are not stopped.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LockError;

/// Derives lock-file paths and acquires locks inside one directory
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_dir: PathBuf,
}

impl LockManager {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// `/dev/mtd1` → `{lock_dir}/cal.mtd1.lock`
    pub fn lock_path(&self, device_path: &Path) -> Result<PathBuf, LockError> {
        let base = device_path
            .file_name()
            .ok_or_else(|| LockError::InvalidDevicePath(device_path.to_path_buf()))?;
        Ok(self
            .lock_dir
            .join(format!("cal.{}.lock", base.to_string_lossy())))
    }

    /// Create the lock file, failing if another holder already created it
    pub fn acquire(&self, device_path: &Path) -> Result<LockGuard, LockError> {
        let path = self.lock_path(device_path)?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(lock = %path.display(), "lock acquired");
                Ok(LockGuard {
                    path,
                    released: false,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(LockError::AlreadyLocked(path)),
            Err(e) => Err(LockError::Io(e)),
        }
    }
}

/// Holds the lock file until released or dropped
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file and report whether that worked
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        fs::remove_file(&self.path)?;
        debug!(lock = %self.path.display(), "lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}
