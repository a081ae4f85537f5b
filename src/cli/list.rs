use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::gateway::{EopkgGateway, PackageManager, RegisteredRepo};
use crate::sandbox::{ChrootRunner, ProcessHandle};

#[derive(Args)]
pub struct ListArgs {
    /// Sandbox root directory
    #[arg(short, long)]
    pub root: PathBuf,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub fn run(args: ListArgs, config: &Config) -> Result<()> {
    let root = super::sandbox_root(&args.root)?;
    let runner = ChrootRunner::new(&config.sandbox);
    let gateway = EopkgGateway::new(
        &runner,
        ProcessHandle::new(),
        &root,
        config.package_manager.clone(),
    );

    let repos = gateway
        .list_repos()
        .with_context(|| format!("Failed to list repositories in {}", root.display()))?;

    println!("{}", render(&repos, &args.format)?);
    Ok(())
}

fn render(repos: &[RegisteredRepo], format: &str) -> Result<String> {
    if format == "json" {
        return Ok(serde_json::to_string_pretty(repos)?);
    }
    if repos.is_empty() {
        return Ok("No repositories registered".to_string());
    }

    let width = repos.iter().map(|r| r.id.len()).max().unwrap_or(0);
    Ok(repos
        .iter()
        .map(|r| format!("{:width$}  {}", r.id, r.uri, width = width))
        .collect::<Vec<_>>()
        .join("\n"))
}
