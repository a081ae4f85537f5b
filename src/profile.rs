//! Declarative repository profile: which repos exist and which to activate.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::RepoError;

/// Selector entry meaning "every repo".
pub const WILDCARD: &str = "*";

/// A named repository source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Filled from the table key when loaded from a profile file.
    #[serde(default, skip_serializing)]
    pub name: String,

    /// Host path when `local`, otherwise a remote locator.
    pub uri: String,

    #[serde(default)]
    pub local: bool,

    /// Regenerate the index inside the sandbox before registering.
    #[serde(default)]
    pub auto_index: bool,
}

impl Repo {
    pub fn remote(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
            local: false,
            auto_index: false,
        }
    }

    pub fn local(name: &str, path: &str, auto_index: bool) -> Self {
        Self {
            name: name.to_string(),
            uri: path.to_string(),
            local: true,
            auto_index,
        }
    }
}

/// Desired repository configuration for one sandbox build.
///
/// `repos` is a `BTreeMap`, so "all repos" always resolves in name order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub repos: BTreeMap<String, Repo>,

    /// Names to activate. Empty or `["*"]` activates every repo.
    #[serde(default)]
    pub add_repos: Vec<String>,

    /// Registered ids to drop. `["*"]` drops everything currently registered.
    #[serde(default)]
    pub remove_repos: Vec<String>,
}

fn is_wildcard(selector: &[String]) -> bool {
    selector.len() == 1 && selector[0] == WILDCARD
}

impl Profile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut profile: Profile = toml::from_str(content)?;
        for (name, repo) in profile.repos.iter_mut() {
            repo.name = name.clone();
            if repo.local {
                repo.uri = shellexpand::tilde(&repo.uri).into_owned();
            }
        }
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse profile {}", path.display()))
    }

    /// Insert a repo keyed by its own name.
    pub fn with_repo(mut self, repo: Repo) -> Self {
        self.repos.insert(repo.name.clone(), repo);
        self
    }

    /// Whether every currently registered repo should be removed.
    pub fn removes_all(&self) -> bool {
        is_wildcard(&self.remove_repos)
    }

    /// Resolve the ids to remove, given the ids currently registered.
    ///
    /// Explicit ids are returned as-is; unknown ids are left for the
    /// package manager to reject.
    pub fn removal_set<'r>(&self, registered: impl IntoIterator<Item = &'r str>) -> Vec<String> {
        if self.removes_all() {
            registered.into_iter().map(str::to_string).collect()
        } else {
            self.remove_repos.clone()
        }
    }

    /// Resolve the repos to add, in the order they will be applied.
    pub fn addition_set(&self) -> crate::error::Result<Vec<&Repo>> {
        if self.add_repos.is_empty() || is_wildcard(&self.add_repos) {
            return Ok(self.repos.values().collect());
        }

        self.add_repos
            .iter()
            .map(|name| {
                self.repos
                    .get(name)
                    .ok_or_else(|| RepoError::config(name, "not defined in profile repos"))
            })
            .collect()
    }
}
