//! CLI subcommand: `repobind paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::paths::Paths;

#[derive(Args)]
pub struct PathsArgs {
    /// Also show the per-sandbox files for this root
    #[arg(short, long)]
    pub root: Option<PathBuf>,
}

pub fn run(args: PathsArgs) -> Result<()> {
    let paths = Paths::resolve()?;
    let root = args.root.as_deref().map(super::sandbox_root).transpose()?;

    println!("repobind Paths (XDG Base Directory)");
    println!("===================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  mount records:  {}", paths.state_dir.join("mounts").display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available, locks go to the state dir)"),
    }

    if let Some(root) = root {
        println!();
        println!("Sandbox:    {}", root.display());
        println!("  mount record:   {}", paths.mount_record(&root).display());
        println!("  lock file:      {}", paths.sandbox_lock(&root).display());
    }

    Ok(())
}
