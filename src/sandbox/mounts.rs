//! Bind mounts that expose host repositories inside the sandbox root.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::RepoError;

/// The mount primitive. Abstracted so reconciliation can run without
/// privileges in tests.
pub trait BindMounter {
    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()>;

    fn unmount(&self, target: &Path) -> io::Result<()>;
}

impl<M: BindMounter + ?Sized> BindMounter for &M {
    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()> {
        (**self).bind_mount(source, target)
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        (**self).unmount(target)
    }
}

/// Real bind mounts via mount(2). Requires CAP_SYS_ADMIN.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

#[cfg(target_os = "linux")]
impl BindMounter for SystemMounter {
    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()> {
        use nix::mount::{MsFlags, mount};
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(io::Error::from)
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        use nix::mount::{MntFlags, umount2};
        umount2(target, MntFlags::MNT_DETACH).map_err(io::Error::from)
    }
}

#[cfg(not(target_os = "linux"))]
impl BindMounter for SystemMounter {
    fn bind_mount(&self, _source: &Path, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "bind mounts are only supported on Linux",
        ))
    }

    fn unmount(&self, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "bind mounts are only supported on Linux",
        ))
    }
}

/// Mount targets created inside one sandbox, in creation order.
///
/// Only ever appended to here; releasing them is the sandbox owner's job
/// (see [`release_mounts`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMounts {
    extra_mounts: Vec<PathBuf>,
}

impl SandboxMounts {
    pub fn paths(&self) -> &[PathBuf] {
        &self.extra_mounts
    }

    pub fn len(&self) -> usize {
        self.extra_mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extra_mounts.is_empty()
    }

    fn record(&mut self, target: PathBuf) {
        self.extra_mounts.push(target);
    }

    /// Drop every recorded target for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.extra_mounts.retain(|p| keep(p));
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write mount record {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read mount record {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Creates `<root><host_repo_dir>/<name>` targets and bind-mounts local
/// repos onto them.
#[derive(Debug, Clone)]
pub struct MountTracker<M> {
    mounter: M,
    /// `host_repo_dir` relative to the sandbox root, normal components only.
    repo_dir: PathBuf,
}

impl<M: BindMounter> MountTracker<M> {
    /// `host_repo_dir` is the in-sandbox directory holding repo mounts,
    /// normally `/hostRepos`. Only its normal components are used, so the
    /// host target and the in-sandbox path always name the same directory.
    pub fn new(mounter: M, host_repo_dir: impl AsRef<Path>) -> Self {
        let repo_dir = host_repo_dir
            .as_ref()
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        Self { mounter, repo_dir }
    }

    /// Where the repo is visible from inside the sandbox.
    pub fn in_sandbox_path(&self, repo_name: &str) -> PathBuf {
        Path::new("/").join(&self.repo_dir).join(repo_name)
    }

    /// Where the repo is mounted, seen from the host.
    pub fn target_path(&self, sandbox_root: &Path, repo_name: &str) -> PathBuf {
        sandbox_root.join(&self.repo_dir).join(repo_name)
    }

    /// Bind-mount `source` at the repo's target and record the mount.
    ///
    /// The target directory is created first if missing and reused otherwise.
    /// Nothing is recorded unless the mount itself succeeds.
    pub fn attach_local(
        &self,
        source: &Path,
        sandbox_root: &Path,
        repo_name: &str,
        mounts: &mut SandboxMounts,
    ) -> crate::error::Result<PathBuf> {
        validate_repo_name(repo_name)?;

        if !source.exists() {
            return Err(RepoError::SourceMissing {
                repo: repo_name.to_string(),
                path: source.to_path_buf(),
            });
        }

        let target = self.target_path(sandbox_root, repo_name);
        let mount_err = |source: io::Error| RepoError::Mount {
            repo: repo_name.to_string(),
            target: target.clone(),
            source,
        };

        if !target.exists() {
            create_mount_dir(&target).map_err(mount_err)?;
        }

        debug!("Bind mounting {} at {}", source.display(), target.display());
        self.mounter
            .bind_mount(source, &target)
            .map_err(mount_err)?;
        mounts.record(target.clone());

        Ok(target)
    }
}

fn create_mount_dir(target: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(target)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(target)
    }
}

/// Reject names that would escape the repo directory when used as a path
/// component.
pub fn validate_repo_name(name: &str) -> crate::error::Result<()> {
    let reason = if name.is_empty() {
        "repo name is empty"
    } else if name == "." || name == ".." {
        "repo name is a relative path component"
    } else if name == crate::profile::WILDCARD {
        "'*' is reserved for selectors"
    } else if name.contains('/') || name.contains('\0') {
        "repo name contains a path separator or NUL"
    } else {
        return Ok(());
    };
    Err(RepoError::config(name, reason))
}

/// Unmount every recorded target, newest first.
///
/// Keeps going past failures and returns them, so one busy mount does not
/// leave the rest attached.
pub fn release_mounts<M: BindMounter>(
    mounter: &M,
    mounts: &SandboxMounts,
) -> Vec<(PathBuf, io::Error)> {
    let mut failures = Vec::new();
    for target in mounts.paths().iter().rev() {
        debug!("Unmounting {}", target.display());
        if let Err(e) = mounter.unmount(target) {
            failures.push((target.clone(), e));
        }
    }
    failures
}
