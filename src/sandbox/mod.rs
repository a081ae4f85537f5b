//! Sandbox side of reconciliation: bind mounts into the chroot and commands
//! executed with the chroot as filesystem root.
//!
//! The sandbox itself (its root filesystem and overlay layers) is built and
//! torn down elsewhere. This module only adds mounts under the repo directory
//! and records them so the owner can release them.

pub mod handle;
pub mod mounts;
pub mod runner;

use std::path::{Path, PathBuf};

pub use handle::ProcessHandle;
pub use mounts::{
    BindMounter, MountTracker, SandboxMounts, SystemMounter, release_mounts, validate_repo_name,
};
pub use runner::{ChrootRunner, SandboxRunner, package_manager_command, reindex_command};

/// One sandbox as seen by a reconciliation pass: its root directory and the
/// mounts added to it so far.
#[derive(Debug, Clone)]
pub struct SandboxSession {
    root: PathBuf,
    pub mounts: SandboxMounts,
}

impl SandboxSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounts: SandboxMounts::default(),
        }
    }

    /// Continue a session whose earlier mounts were recorded elsewhere.
    pub fn with_mounts(root: impl Into<PathBuf>, mounts: SandboxMounts) -> Self {
        Self {
            root: root.into(),
            mounts,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root and mount record together, for code that mounts into the root.
    pub fn split_mut(&mut self) -> (&Path, &mut SandboxMounts) {
        (&self.root, &mut self.mounts)
    }
}
