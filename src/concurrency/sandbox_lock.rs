//! Cross-process lock per sandbox root using advisory file locking (fs2 flock).
//!
//! A reconciliation pass assumes it is the only writer of the sandbox's
//! mounts and repo list. Two `repobind` processes pointed at the same root
//! would interleave mounts and package-manager calls, so they serialize here.

use anyhow::Result;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::paths::Paths;

/// Advisory file lock for one sandbox root.
///
/// The lock file lives under the runtime directory, outside the sandbox.
#[derive(Clone)]
pub struct SandboxLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
pub struct SandboxLockGuard {
    file: File,
}

impl Drop for SandboxLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl SandboxLock {
    pub fn new(paths: &Paths, sandbox_root: &Path) -> Result<Self> {
        let path = paths.sandbox_lock(sandbox_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquire: waits until the lock is available.
    pub fn acquire(&self) -> Result<SandboxLockGuard> {
        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        Ok(SandboxLockGuard { file })
    }

    /// Non-blocking: returns `None` if another process holds the lock.
    pub fn try_acquire(&self) -> Result<Option<SandboxLockGuard>> {
        let file = File::create(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(SandboxLockGuard { file })),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            #[cfg(unix)]
            Err(ref e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
