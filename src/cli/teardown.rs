use anyhow::Result;
use clap::Args;
use std::fs;
use std::path::PathBuf;
use tracing::error;

use crate::config::Config;
use crate::sandbox::{SandboxMounts, SystemMounter, release_mounts};

#[derive(Args)]
pub struct TeardownArgs {
    /// Sandbox root whose default mount record should be released
    #[arg(short, long, required_unless_present = "mount_record")]
    pub root: Option<PathBuf>,

    /// Mount record written by `apply`
    #[arg(long)]
    pub mount_record: Option<PathBuf>,
}

pub fn run(args: TeardownArgs, config: &Config) -> Result<()> {
    let record_path = match (args.mount_record, args.root) {
        (Some(path), _) => path,
        (None, Some(root)) => config.paths.mount_record(&super::sandbox_root(&root)?),
        (None, None) => anyhow::bail!("Either --root or --mount-record is required"),
    };

    if !record_path.exists() {
        println!("No mounts recorded at {}", record_path.display());
        return Ok(());
    }

    let mounts = SandboxMounts::load(&record_path)?;
    let failures = release_mounts(&SystemMounter, &mounts);
    if failures.is_empty() {
        fs::remove_file(&record_path)?;
        println!("Released {} mount(s)", mounts.len());
        return Ok(());
    }

    for (target, e) in &failures {
        error!("Failed to unmount {}: {}", target.display(), e);
    }
    let mut remaining = mounts.clone();
    remaining.retain(|p| failures.iter().any(|(target, _)| target == p));
    remaining.save(&record_path)?;

    anyhow::bail!(
        "{} of {} mount(s) could not be released; remaining ones kept in {}",
        failures.len(),
        mounts.len(),
        record_path.display()
    )
}
