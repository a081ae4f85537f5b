pub mod apply;
pub mod config;
pub mod list;
pub mod paths;
pub mod teardown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "repobind")]
#[command(
    author,
    version,
    about = "Reconcile the package repositories of a chroot build sandbox"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "REPOBIND_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a repository profile to a sandbox
    Apply(apply::ApplyArgs),

    /// List repositories registered in a sandbox
    List(list::ListArgs),

    /// Release the bind mounts recorded by a previous apply
    Teardown(teardown::TeardownArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths(paths::PathsArgs),
}

/// Canonical form of a sandbox root given on the command line.
///
/// Mount records and locks are keyed by this path, so `./root` and
/// `/abs/root` must agree.
pub(crate) fn sandbox_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Sandbox root {} does not exist", path.display()))?;
    if !root.is_dir() {
        anyhow::bail!("Sandbox root {} is not a directory", root.display());
    }
    Ok(root)
}
