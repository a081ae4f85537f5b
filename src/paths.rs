//! XDG Base Directory compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. repobind-specific env var (REPOBIND_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored, as XDG requires.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// Resolved directory paths for the application.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// State directory: mount records
    pub state_dir: PathBuf,

    /// Runtime directory: sandbox lock files.
    /// None if no suitable runtime directory is available.
    pub runtime_dir: Option<PathBuf>,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "REPOBIND_CONFIG_DIR", || {
            strategy.config_dir().join("repobind")
        });

        let state_dir = env_or(&env_fn, "REPOBIND_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("repobind")
        });

        let runtime_dir = resolve_runtime_dir(&env_fn);

        Ok(Self {
            config_dir,
            state_dir,
            runtime_dir,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default mount record for a sandbox: state_dir/mounts/{key}.json
    pub fn mount_record(&self, sandbox_root: &Path) -> PathBuf {
        self.state_dir
            .join("mounts")
            .join(format!("{}.json", sandbox_key(sandbox_root)))
    }

    /// Lock file serializing passes on one sandbox root
    /// (in runtime_dir, falls back to state_dir)
    pub fn sandbox_lock(&self, sandbox_root: &Path) -> PathBuf {
        self.runtime_dir
            .as_ref()
            .unwrap_or(&self.state_dir)
            .join("locks")
            .join(format!("{}.lock", sandbox_key(sandbox_root)))
    }

    /// Create all directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir_with_mode(&self.config_dir)?;
        create_dir_with_mode(&self.state_dir)?;
        if let Some(ref runtime) = self.runtime_dir {
            create_dir_with_mode(runtime)?;
        }
        Ok(())
    }
}

/// Flatten a sandbox root into a single file name component.
///
/// Alphanumerics, `-` and `.` are kept; every other byte becomes `_xx` (hex),
/// so distinct roots never share a key. `/` alone maps to `_`.
fn sandbox_key(sandbox_root: &Path) -> String {
    #[cfg(unix)]
    let raw = {
        use std::os::unix::ffi::OsStrExt;
        sandbox_root.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let raw = sandbox_root.to_string_lossy().into_owned().into_bytes();

    let start = raw.iter().position(|&b| b != b'/').unwrap_or(raw.len());
    let end = raw.iter().rposition(|&b| b != b'/').map_or(start, |i| i + 1);
    let trimmed = &raw[start..end];
    if trimmed.is_empty() {
        return "_".to_string();
    }

    let mut key = String::with_capacity(trimmed.len());
    for &byte in trimmed {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("_{:02x}", byte));
        }
    }
    key
}

/// Resolve an env var with fallback. Empty and relative values are ignored.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

fn resolve_runtime_dir<F>(env_fn: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Some(path.join("repobind"));
        }
    }

    // Fallback: $TMPDIR/repobind-$UID on Unix
    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Some(PathBuf::from(tmpdir).join(format!("repobind-{}", uid)))
    }

    #[cfg(not(unix))]
    {
        None
    }
}

fn create_dir_with_mode(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))
    }
}
