use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::concurrency::SandboxLock;
use crate::config::Config;
use crate::error::RepoError;
use crate::gateway::EopkgGateway;
use crate::profile::Profile;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::sandbox::{
    ChrootRunner, MountTracker, ProcessHandle, SandboxMounts, SandboxSession, SystemMounter,
};

#[derive(Args)]
pub struct ApplyArgs {
    /// Sandbox root directory
    #[arg(short, long)]
    pub root: PathBuf,

    /// Repository profile (TOML)
    #[arg(short, long)]
    pub profile: PathBuf,

    /// Where to record the bind mounts created (default: state dir)
    #[arg(long)]
    pub mount_record: Option<PathBuf>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Wait for another repobind process on the same root instead of failing
    #[arg(short, long)]
    pub wait: bool,
}

pub async fn run(args: ApplyArgs, config: Config) -> Result<()> {
    let root = super::sandbox_root(&args.root)?;
    let profile = Profile::load(&args.profile)?;
    let record_path = args
        .mount_record
        .unwrap_or_else(|| config.paths.mount_record(&root));

    let lock = SandboxLock::new(&config.paths, &root)?;
    let _guard = if args.wait {
        info!("Waiting for the lock on {}", root.display());
        let waiting = lock.clone();
        tokio::task::spawn_blocking(move || waiting.acquire())
            .await
            .context("Lock task panicked")??
    } else {
        lock.try_acquire()?.with_context(|| {
            format!(
                "Another repobind process is working on {} (lock: {}); use --wait to queue",
                root.display(),
                lock.path().display()
            )
        })?
    };

    // The lock is held, so the record cannot change under us.
    let session = resume_session(&root, &record_path)?;
    let recorded = session.mounts.len();

    let handle = ProcessHandle::new();
    let supervisor = handle.clone();
    let worker =
        tokio::task::spawn_blocking(move || apply_blocking(&config, &profile, session, &handle));
    tokio::pin!(worker);

    let (session, outcome) = loop {
        tokio::select! {
            joined = &mut worker => break joined.context("Reconciliation task panicked")?,
            _ = tokio::signal::ctrl_c() => match supervisor.cancel() {
                Ok(true) => warn!("Interrupted, terminating the sandboxed command"),
                Ok(false) => warn!("Interrupted, stopping before the next step"),
                Err(e) => warn!("Failed to signal the sandboxed command: {}", e),
            },
        }
    };

    // Mounts made before a failure still need tearing down.
    if session.mounts.len() > recorded {
        session.mounts.save(&record_path)?;
        info!(
            "Recorded {} new mount(s) in {} ({} total)",
            session.mounts.len() - recorded,
            record_path.display(),
            session.mounts.len()
        );
    }

    let report =
        outcome.with_context(|| format!("Failed to reconcile repositories in {}", root.display()))?;
    print_report(&report, &args.format)
}

/// Session for `root` carrying the mounts recorded by earlier passes, so the
/// saved record keeps every mount until teardown.
fn resume_session(root: &Path, record_path: &Path) -> Result<SandboxSession> {
    let mounts = if record_path.exists() {
        SandboxMounts::load(record_path)?
    } else {
        SandboxMounts::default()
    };
    Ok(SandboxSession::with_mounts(root, mounts))
}

fn apply_blocking(
    config: &Config,
    profile: &Profile,
    mut session: SandboxSession,
    handle: &ProcessHandle,
) -> (SandboxSession, Result<ReconcileReport, RepoError>) {
    let runner = ChrootRunner::new(&config.sandbox);
    let gateway = EopkgGateway::new(
        &runner,
        handle.clone(),
        session.root(),
        config.package_manager.clone(),
    );
    let tracker = MountTracker::new(SystemMounter, &config.sandbox.host_repo_dir);
    let mut reconciler =
        Reconciler::new(gateway, tracker, &runner, config.package_manager.clone());

    let outcome = reconciler.reconcile(profile, &mut session, handle);
    if outcome.is_err() {
        for step in reconciler.journal() {
            warn!("Left in place by the failed pass: {:?}", step);
        }
    }
    (session, outcome)
}

fn print_report(report: &ReconcileReport, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for id in report.removed() {
        println!("Removed {}", id);
    }
    for name in report.added() {
        println!("Added   {}", name);
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    if report.steps.is_empty() {
        println!("Nothing to do");
    }
    Ok(())
}
