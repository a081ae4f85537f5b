//! repobind - reconcile the package repositories of a chroot build sandbox
//!
//! This crate provides:
//! - A declarative repository profile and its add/remove selectors
//! - A package-manager gateway that lists, adds and removes repos in the sandbox
//! - Bind mounts exposing local repositories under `/hostRepos`, tracked for teardown
//! - A chroot command runner whose active process is observable and signalable
//! - The reconciler that diffs the profile against the sandbox and applies it
//! - The `repobind` command line (apply, list, teardown, config, paths)

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod gateway;
pub mod paths;
pub mod profile;
pub mod reconcile;
pub mod sandbox;

pub use config::Config;
pub use error::{ExecError, GatewayError, RepoError};
pub use profile::{Profile, Repo};
pub use reconcile::{ReconcileReport, Reconciler};
