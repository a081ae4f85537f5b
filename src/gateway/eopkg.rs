use std::path::PathBuf;
use tracing::debug;

use super::{PackageManager, RegisteredRepo};
use crate::config::PackageManagerConfig;
use crate::error::GatewayError;
use crate::sandbox::{ProcessHandle, SandboxRunner, package_manager_command};

/// Drives `eopkg` inside the sandbox root through a [`SandboxRunner`].
pub struct EopkgGateway<R> {
    runner: R,
    handle: ProcessHandle,
    root: PathBuf,
    config: PackageManagerConfig,
}

impl<R: SandboxRunner> EopkgGateway<R> {
    pub fn new(
        runner: R,
        handle: ProcessHandle,
        root: impl Into<PathBuf>,
        config: PackageManagerConfig,
    ) -> Self {
        Self {
            runner,
            handle,
            root: root.into(),
            config,
        }
    }

    fn run(&self, args: &[&str]) -> Result<(), GatewayError> {
        let command = package_manager_command(&self.config, args);
        self.runner.run(&self.handle, &self.root, &command)?;
        Ok(())
    }
}

impl<R: SandboxRunner> PackageManager for EopkgGateway<R> {
    fn list_repos(&self) -> Result<Vec<RegisteredRepo>, GatewayError> {
        let command = package_manager_command(&self.config, &["list-repo", "-N"]);
        let output = self.runner.output(&self.handle, &self.root, &command)?;
        parse_repo_listing(&output)
    }

    fn add_repo(&self, name: &str, locator: &str) -> Result<(), GatewayError> {
        debug!("Adding repository {} from {}", name, locator);
        self.run(&["add-repo", name, locator])
    }

    fn remove_repo(&self, id: &str) -> Result<(), GatewayError> {
        // eopkg exits 0 for unknown ids, so check first.
        if !self.list_repos()?.iter().any(|r| r.id == id) {
            return Err(GatewayError::Rejected(format!(
                "no repository named '{}' is registered",
                id
            )));
        }
        debug!("Removing repository {}", id);
        self.run(&["remove-repo", id])
    }
}

/// Parse `eopkg list-repo` output.
///
/// Each repo is a `<id> [active]` (or `[inactive]`) line followed by an
/// indented URI line. Colour escapes are ignored, as are lines that fit
/// neither shape.
pub fn parse_repo_listing(output: &str) -> Result<Vec<RegisteredRepo>, GatewayError> {
    let mut repos = Vec::new();
    let mut pending: Option<String> = None;

    for raw in output.lines() {
        let line = strip_ansi(raw);
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            match pending.take() {
                Some(id) => repos.push(RegisteredRepo {
                    id,
                    uri: line.trim().to_string(),
                }),
                None => debug!("Ignoring stray repo listing line: {}", line.trim()),
            }
            continue;
        }

        if let Some(id) = parse_header(line.trim_end())
            && let Some(previous) = pending.replace(id)
        {
            return Err(GatewayError::Parse(format!(
                "repository '{}' has no URI",
                previous
            )));
        }
    }

    if let Some(id) = pending {
        return Err(GatewayError::Parse(format!(
            "repository '{}' has no URI",
            id
        )));
    }

    Ok(repos)
}

fn parse_header(line: &str) -> Option<String> {
    let (id, status) = line.rsplit_once(' ')?;
    let id = id.trim();
    (matches!(status, "[active]" | "[inactive]") && !id.is_empty()).then(|| id.to_string())
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
