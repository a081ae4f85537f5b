//! Package-manager gateway: the registered-repository list inside a sandbox.

pub mod eopkg;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use eopkg::{EopkgGateway, parse_repo_listing};

/// A repository as the package manager currently knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRepo {
    pub id: String,
    pub uri: String,
}

/// List, add and remove registered repositories.
///
/// Each call is a single attempt; nothing is retried.
#[cfg_attr(test, mockall::automock)]
pub trait PackageManager {
    fn list_repos(&self) -> Result<Vec<RegisteredRepo>, GatewayError>;

    /// Register `name` from `locator`: a remote URI or an in-sandbox path to
    /// an index file.
    fn add_repo(&self, name: &str, locator: &str) -> Result<(), GatewayError>;

    /// Unregister `id`. Unknown ids are an error.
    fn remove_repo(&self, id: &str) -> Result<(), GatewayError>;
}

impl<G: PackageManager + ?Sized> PackageManager for &G {
    fn list_repos(&self) -> Result<Vec<RegisteredRepo>, GatewayError> {
        (**self).list_repos()
    }

    fn add_repo(&self, name: &str, locator: &str) -> Result<(), GatewayError> {
        (**self).add_repo(name, locator)
    }

    fn remove_repo(&self, id: &str) -> Result<(), GatewayError> {
        (**self).remove_repo(id)
    }
}
