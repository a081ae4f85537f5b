//! Error taxonomy for a reconciliation pass.
//!
//! Every variant names the repository (or repo id) it concerns. Errors are
//! returned at the first failing step; nothing is retried or rolled back.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    /// A selector or repo definition references something that does not exist
    /// or cannot be used as a repo name.
    #[error("configuration error for repo '{repo}': {reason}")]
    Config { repo: String, reason: String },

    /// The host path backing a local repo is absent.
    #[error("local repo '{repo}' does not exist at {}", path.display())]
    SourceMissing { repo: String, path: PathBuf },

    /// Creating the mount target or performing the bind mount failed.
    #[error("failed to mount repo '{repo}' at {}: {source}", target.display())]
    Mount {
        repo: String,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sandboxed command could not be started or did not exit cleanly.
    #[error("failed to run command for repo '{repo}': {source}")]
    Exec {
        repo: String,
        #[source]
        source: ExecError,
    },

    /// The pass was cancelled before this repo's step started.
    #[error("reconciliation interrupted before repo '{repo}'")]
    Interrupted { repo: String },

    /// The package manager rejected an operation.
    #[error("package manager failed for repo '{repo}': {source}")]
    Gateway {
        repo: String,
        #[source]
        source: GatewayError,
    },
}

impl RepoError {
    /// Name or id of the repo this error concerns.
    pub fn repo(&self) -> &str {
        match self {
            RepoError::Config { repo, .. }
            | RepoError::SourceMissing { repo, .. }
            | RepoError::Mount { repo, .. }
            | RepoError::Exec { repo, .. }
            | RepoError::Interrupted { repo }
            | RepoError::Gateway { repo, .. } => repo,
        }
    }

    pub(crate) fn config(repo: impl Into<String>, reason: impl Into<String>) -> Self {
        RepoError::Config {
            repo: repo.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a command executed inside the sandbox root.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}")]
    Status { command: String, code: i32 },

    #[error("`{command}` was killed by signal {signal}")]
    Signaled { command: String, signal: i32 },

    #[error("waiting on `{command}` failed: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a package-manager operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("unexpected output from package manager: {0}")]
    Parse(String),

    #[error("{0}")]
    Rejected(String),
}
