//! One reconciliation pass: bring the sandbox's registered repos in line with
//! a [`Profile`].
//!
//! The pass runs `Start → Removing → Adding → Done` and stops at the first
//! failure. Nothing is rolled back: repos already removed stay removed,
//! mounts already made stay mounted and recorded, repos already added stay
//! registered. [`Reconciler::journal`] tells the caller how far a failed pass
//! got.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::PackageManagerConfig;
use crate::error::{RepoError, Result};
use crate::gateway::PackageManager;
use crate::profile::{Profile, Repo, WILDCARD};
use crate::sandbox::{
    BindMounter, MountTracker, ProcessHandle, SandboxRunner, SandboxSession, reindex_command,
    validate_repo_name,
};

/// A step that completed and was not undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AppliedStep {
    Removed { id: String },
    Mounted { repo: String, target: PathBuf },
    Reindexed { repo: String },
    Added { repo: String, locator: String },
}

/// Non-fatal conditions noticed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// A local repo without auto-indexing has no index file yet.
    MissingIndex { repo: String, path: PathBuf },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingIndex { repo, path } => write!(
                f,
                "repository '{}' has no index at {}; index it to use it",
                repo,
                path.display()
            ),
        }
    }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub steps: Vec<AppliedStep>,
    pub warnings: Vec<Warning>,
}

impl ReconcileReport {
    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            AppliedStep::Removed { id } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn added(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            AppliedStep::Added { repo, .. } => Some(repo.as_str()),
            _ => None,
        })
    }
}

pub struct Reconciler<G, M, R> {
    gateway: G,
    tracker: MountTracker<M>,
    runner: R,
    package_manager: PackageManagerConfig,
    journal: Vec<AppliedStep>,
    warnings: Vec<Warning>,
}

impl<G, M, R> Reconciler<G, M, R>
where
    G: PackageManager,
    M: BindMounter,
    R: SandboxRunner,
{
    pub fn new(
        gateway: G,
        tracker: MountTracker<M>,
        runner: R,
        package_manager: PackageManagerConfig,
    ) -> Self {
        Self {
            gateway,
            tracker,
            runner,
            package_manager,
            journal: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Steps applied by the latest pass, including one that failed.
    pub fn journal(&self) -> &[AppliedStep] {
        &self.journal
    }

    /// Run one pass against `session`.
    ///
    /// The addition set is resolved (and every local repo name validated)
    /// before the package manager is touched, so selector mistakes fail
    /// without side effects. `handle` carries the pid of any reindex command
    /// while it runs.
    pub fn reconcile(
        &mut self,
        profile: &Profile,
        session: &mut SandboxSession,
        handle: &ProcessHandle,
    ) -> Result<ReconcileReport> {
        self.journal.clear();
        self.warnings.clear();

        let additions = profile.addition_set()?;
        for repo in additions.iter().filter(|r| r.local) {
            validate_repo_name(&repo.name)?;
        }

        let registered = self
            .gateway
            .list_repos()
            .map_err(|source| RepoError::Gateway {
                repo: WILDCARD.to_string(),
                source,
            })?;
        let removals = profile.removal_set(registered.iter().map(|r| r.id.as_str()));

        self.remove_repos(&removals, handle)?;
        self.add_repos(&additions, session, handle)?;

        info!(
            "Reconciled repositories: {} removed, {} added",
            removals.len(),
            additions.len()
        );

        Ok(ReconcileReport {
            steps: self.journal.clone(),
            warnings: self.warnings.clone(),
        })
    }

    fn remove_repos(&mut self, ids: &[String], handle: &ProcessHandle) -> Result<()> {
        for id in ids {
            check_cancelled(handle, id)?;
            debug!("Removing repository {}", id);
            self.gateway
                .remove_repo(id)
                .map_err(|source| RepoError::Gateway {
                    repo: id.clone(),
                    source,
                })?;
            self.journal.push(AppliedStep::Removed { id: id.clone() });
        }
        Ok(())
    }

    fn add_repos(
        &mut self,
        repos: &[&Repo],
        session: &mut SandboxSession,
        handle: &ProcessHandle,
    ) -> Result<()> {
        for repo in repos {
            check_cancelled(handle, &repo.name)?;
            let locator = if repo.local {
                debug!("Adding local repo to system {} {}", repo.name, repo.uri);
                self.prepare_local(repo, session, handle)?
            } else {
                debug!("Adding repo to system {} {}", repo.name, repo.uri);
                repo.uri.clone()
            };

            self.gateway
                .add_repo(&repo.name, &locator)
                .map_err(|source| RepoError::Gateway {
                    repo: repo.name.clone(),
                    source,
                })?;
            self.journal.push(AppliedStep::Added {
                repo: repo.name.clone(),
                locator,
            });
        }
        Ok(())
    }

    /// Mount a local repo and make sure it is indexed; returns the in-sandbox
    /// index locator to register.
    fn prepare_local(
        &mut self,
        repo: &Repo,
        session: &mut SandboxSession,
        handle: &ProcessHandle,
    ) -> Result<String> {
        let (root, mounts) = session.split_mut();
        let target = self
            .tracker
            .attach_local(Path::new(&repo.uri), root, &repo.name, mounts)?;
        self.journal.push(AppliedStep::Mounted {
            repo: repo.name.clone(),
            target: target.clone(),
        });

        let repo_dir = self.tracker.in_sandbox_path(&repo.name);
        let index_file = &self.package_manager.index_file;

        if repo.auto_index {
            debug!("Reindexing repository {}", repo.name);
            let command = reindex_command(&repo_dir, &self.package_manager);
            self.runner
                .run(handle, root, &command)
                .map_err(|source| RepoError::Exec {
                    repo: repo.name.clone(),
                    source,
                })?;
            self.journal.push(AppliedStep::Reindexed {
                repo: repo.name.clone(),
            });
        } else {
            let index = target.join(index_file);
            if !index.exists() {
                let warning = Warning::MissingIndex {
                    repo: repo.name.clone(),
                    path: index,
                };
                warn!("{}", warning);
                self.warnings.push(warning);
            }
        }

        Ok(repo_dir.join(index_file).to_string_lossy().into_owned())
    }
}

fn check_cancelled(handle: &ProcessHandle, repo: &str) -> Result<()> {
    if handle.is_cancelled() {
        return Err(RepoError::Interrupted {
            repo: repo.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecError, GatewayError};
    use crate::gateway::{MockPackageManager, RegisteredRepo};
    use crate::sandbox::mounts::tests::FakeMounter;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        List,
        Add(String, String),
        Remove(String),
    }

    /// Package manager fake that records calls in order.
    #[derive(Default)]
    struct RecordingGateway {
        registered: Mutex<Vec<RegisteredRepo>>,
        calls: Mutex<Vec<Call>>,
        fail_add: Option<String>,
    }

    impl RecordingGateway {
        fn with_registered(ids: &[&str]) -> Self {
            let repos = ids
                .iter()
                .map(|id| RegisteredRepo {
                    id: id.to_string(),
                    uri: format!("http://example/{id}"),
                })
                .collect();
            Self {
                registered: Mutex::new(repos),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn registered_ids(&self) -> Vec<String> {
            self.registered
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.id.clone())
                .collect()
        }
    }

    impl PackageManager for RecordingGateway {
        fn list_repos(&self) -> std::result::Result<Vec<RegisteredRepo>, GatewayError> {
            self.calls.lock().unwrap().push(Call::List);
            Ok(self.registered.lock().unwrap().clone())
        }

        fn add_repo(&self, name: &str, locator: &str) -> std::result::Result<(), GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Add(name.into(), locator.into()));
            if self.fail_add.as_deref() == Some(name) {
                return Err(GatewayError::Rejected("add-repo failed".into()));
            }
            self.registered.lock().unwrap().push(RegisteredRepo {
                id: name.into(),
                uri: locator.into(),
            });
            Ok(())
        }

        fn remove_repo(&self, id: &str) -> std::result::Result<(), GatewayError> {
            self.calls.lock().unwrap().push(Call::Remove(id.into()));
            let mut registered = self.registered.lock().unwrap();
            let before = registered.len();
            registered.retain(|r| r.id != id);
            if registered.len() == before {
                return Err(GatewayError::Rejected(format!("unknown repo {id}")));
            }
            Ok(())
        }
    }

    /// Records reindex commands; observes the handle while "running".
    #[derive(Default)]
    struct FakeRunner {
        commands: Mutex<Vec<String>>,
        fail: bool,
    }

    impl SandboxRunner for FakeRunner {
        fn run(
            &self,
            handle: &ProcessHandle,
            _root: &Path,
            command: &str,
        ) -> std::result::Result<(), ExecError> {
            let _active = handle.track(99);
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail {
                return Err(ExecError::Status {
                    command: command.to_string(),
                    code: 1,
                });
            }
            Ok(())
        }

        fn output(
            &self,
            _handle: &ProcessHandle,
            _root: &Path,
            _command: &str,
        ) -> std::result::Result<String, ExecError> {
            unreachable!("reconciler never captures output")
        }
    }

    struct Fixture {
        gateway: RecordingGateway,
        mounter: FakeMounter,
        runner: FakeRunner,
        session: SandboxSession,
        handle: ProcessHandle,
        _root: tempfile::TempDir,
    }

    impl Fixture {
        fn new(gateway: RecordingGateway) -> Self {
            let root = tempfile::tempdir().unwrap();
            Self {
                gateway,
                mounter: FakeMounter::default(),
                runner: FakeRunner::default(),
                session: SandboxSession::new(root.path()),
                handle: ProcessHandle::new(),
                _root: root,
            }
        }

        fn reconcile(&mut self, profile: &Profile) -> (Result<ReconcileReport>, Vec<AppliedStep>) {
            let mut reconciler = Reconciler::new(
                &self.gateway,
                MountTracker::new(&self.mounter, "/hostRepos"),
                &self.runner,
                PackageManagerConfig::default(),
            );
            let result = reconciler.reconcile(profile, &mut self.session, &self.handle);
            (result, reconciler.journal().to_vec())
        }

        fn root(&self) -> &Path {
            self.session.root()
        }
    }

    fn host_repo(with_index: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if with_index {
            fs::write(dir.path().join("eopkg-index.xml.xz"), b"index").unwrap();
        }
        dir
    }

    #[test]
    fn remote_repo_is_registered_directly() {
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile {
            add_repos: vec!["*".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("stable", "http://example/repo"));

        let (result, _) = fx.reconcile(&profile);
        let report = result.unwrap();

        assert_eq!(
            fx.gateway.calls(),
            [
                Call::List,
                Call::Add("stable".into(), "http://example/repo".into())
            ]
        );
        assert_eq!(report.removed().count(), 0);
        assert!(fx.mounter.mounted.lock().unwrap().is_empty());
        assert!(fx.session.mounts.is_empty());
    }

    #[test]
    fn unindexed_local_repo_warns_and_registers() {
        let host = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile::default().with_repo(Repo::local(
            "dev",
            host.path().to_str().unwrap(),
            false,
        ));

        let (result, _) = fx.reconcile(&profile);
        let report = result.unwrap();

        let target = fx.root().join("hostRepos/dev");
        assert_eq!(fx.session.mounts.paths(), [target.clone()]);
        assert_eq!(
            *fx.mounter.mounted.lock().unwrap(),
            [(host.path().to_path_buf(), target.clone())]
        );
        assert_eq!(
            report.warnings,
            [Warning::MissingIndex {
                repo: "dev".into(),
                path: target.join("eopkg-index.xml.xz"),
            }]
        );
        assert_eq!(
            fx.gateway.calls().last(),
            Some(&Call::Add(
                "dev".into(),
                "/hostRepos/dev/eopkg-index.xml.xz".into()
            ))
        );
        assert!(fx.runner.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn indexed_local_repo_has_no_warning() {
        let host = host_repo(true);
        let root = tempfile::tempdir().unwrap();
        // The fake mounter does not mount, so stage the index at the target.
        let target = root.path().join("hostRepos/dev");
        fs::create_dir_all(&target).unwrap();
        fs::copy(
            host.path().join("eopkg-index.xml.xz"),
            target.join("eopkg-index.xml.xz"),
        )
        .unwrap();

        let mut fx = Fixture::new(RecordingGateway::default());
        fx.session = SandboxSession::new(root.path());
        let profile = Profile::default().with_repo(Repo::local(
            "dev",
            host.path().to_str().unwrap(),
            false,
        ));

        let (result, _) = fx.reconcile(&profile);
        assert!(result.unwrap().warnings.is_empty());
    }

    #[test]
    fn auto_indexed_local_repo_reindexes_before_registering() {
        let host = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile::default().with_repo(Repo::local(
            "dev",
            host.path().to_str().unwrap(),
            true,
        ));

        let (result, journal) = fx.reconcile(&profile);
        let report = result.unwrap();

        assert_eq!(
            *fx.runner.commands.lock().unwrap(),
            ["cd /hostRepos/dev && eopkg index --skip-signing ."]
        );
        assert!(report.warnings.is_empty());
        assert_eq!(fx.handle.active_pid(), None);
        assert!(matches!(journal[0], AppliedStep::Mounted { .. }));
        assert_eq!(
            journal[1],
            AppliedStep::Reindexed {
                repo: "dev".into()
            }
        );
        assert!(matches!(journal[2], AppliedStep::Added { .. }));
    }

    #[test]
    fn failed_reindex_aborts_and_clears_handle() {
        let first = host_repo(false);
        let second = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        fx.runner.fail = true;
        let profile = Profile::default()
            .with_repo(Repo::local("a", first.path().to_str().unwrap(), true))
            .with_repo(Repo::local("b", second.path().to_str().unwrap(), true));

        let (result, journal) = fx.reconcile(&profile);
        let err = result.unwrap_err();

        assert!(matches!(err, RepoError::Exec { ref repo, .. } if repo == "a"));
        assert_eq!(fx.handle.active_pid(), None);
        // Mounted but never registered; b never attempted.
        assert_eq!(fx.session.mounts.len(), 1);
        assert_eq!(fx.gateway.calls(), [Call::List]);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn empty_remove_selector_removes_nothing() {
        let mut fx = Fixture::new(RecordingGateway::with_registered(&["a", "b"]));
        let (result, _) = fx.reconcile(&Profile::default());
        result.unwrap();

        assert!(
            !fx.gateway
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Remove(_)))
        );
        assert_eq!(fx.gateway.registered_ids(), ["a", "b"]);
    }

    #[test]
    fn wildcard_remove_drops_every_registered_repo_in_list_order() {
        let mut fx = Fixture::new(RecordingGateway::with_registered(&["a", "b"]));
        let profile = Profile {
            remove_repos: vec!["*".into()],
            ..Default::default()
        };

        let (result, _) = fx.reconcile(&profile);
        let report = result.unwrap();

        assert_eq!(
            fx.gateway.calls(),
            [Call::List, Call::Remove("a".into()), Call::Remove("b".into())]
        );
        assert!(fx.gateway.registered_ids().is_empty());
        assert_eq!(report.removed().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn removals_complete_before_additions() {
        let mut fx = Fixture::new(RecordingGateway::with_registered(&["old"]));
        let profile = Profile {
            remove_repos: vec!["old".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("new", "http://example/new"));

        let (result, _) = fx.reconcile(&profile);
        result.unwrap();

        assert_eq!(
            fx.gateway.calls(),
            [
                Call::List,
                Call::Remove("old".into()),
                Call::Add("new".into(), "http://example/new".into()),
            ]
        );
    }

    #[test]
    fn failed_removal_stops_pass_without_compensation() {
        let mut fx = Fixture::new(RecordingGateway::with_registered(&["a", "c"]));
        let profile = Profile {
            remove_repos: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("new", "http://example/new"));

        let (result, journal) = fx.reconcile(&profile);
        let err = result.unwrap_err();

        assert!(matches!(err, RepoError::Gateway { ref repo, .. } if repo == "b"));
        assert_eq!(fx.gateway.registered_ids(), ["c"]);
        assert_eq!(journal, [AppliedStep::Removed { id: "a".into() }]);
        assert!(
            !fx.gateway
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Add(..)))
        );
    }

    #[test]
    fn all_profile_repos_attempted_once_in_name_order() {
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile::default()
            .with_repo(Repo::remote("zeta", "http://z"))
            .with_repo(Repo::remote("alpha", "http://a"))
            .with_repo(Repo::remote("mid", "http://m"));

        let (result, _) = fx.reconcile(&profile);
        let report = result.unwrap();

        assert_eq!(report.added().collect::<Vec<_>>(), ["alpha", "mid", "zeta"]);
        assert_eq!(
            fx.gateway
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::Add(..)))
                .count(),
            3
        );
    }

    #[test]
    fn explicit_add_selector_order_is_kept() {
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile {
            add_repos: vec!["zeta".into(), "alpha".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("zeta", "http://z"))
        .with_repo(Repo::remote("alpha", "http://a"))
        .with_repo(Repo::remote("unused", "http://u"));

        let (result, _) = fx.reconcile(&profile);
        assert_eq!(result.unwrap().added().collect::<Vec<_>>(), ["zeta", "alpha"]);
    }

    #[test]
    fn unknown_add_name_fails_before_any_gateway_call() {
        let mut fx = Fixture::new(RecordingGateway::with_registered(&["a"]));
        let profile = Profile {
            add_repos: vec!["missing".into()],
            remove_repos: vec!["*".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("present", "http://p"));

        let (result, _) = fx.reconcile(&profile);
        let err = result.unwrap_err();

        assert!(matches!(err, RepoError::Config { ref repo, .. } if repo == "missing"));
        assert!(fx.gateway.calls().is_empty());
    }

    #[test]
    fn unsafe_local_repo_name_fails_before_any_gateway_call() {
        let host = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        let mut repo = Repo::local("evil", host.path().to_str().unwrap(), false);
        repo.name = "..".into();
        let mut profile = Profile::default();
        profile.repos.insert("..".into(), repo);

        let (result, _) = fx.reconcile(&profile);
        assert!(matches!(result, Err(RepoError::Config { .. })));
        assert!(fx.gateway.calls().is_empty());
    }

    #[test]
    fn failed_attach_on_nth_local_repo_is_fail_fast() {
        let one = host_repo(false);
        let two = host_repo(false);
        let four = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        let profile = Profile {
            add_repos: vec!["r1".into(), "r2".into(), "r3".into(), "r4".into()],
            ..Default::default()
        }
        .with_repo(Repo::local("r1", one.path().to_str().unwrap(), false))
        .with_repo(Repo::local("r2", two.path().to_str().unwrap(), false))
        .with_repo(Repo::local("r3", "/no/such/repo", false))
        .with_repo(Repo::local("r4", four.path().to_str().unwrap(), false));

        let (result, _) = fx.reconcile(&profile);
        let err = result.unwrap_err();

        assert!(matches!(err, RepoError::SourceMissing { ref repo, .. } if repo == "r3"));
        assert_eq!(
            fx.session.mounts.paths(),
            [fx.root().join("hostRepos/r1"), fx.root().join("hostRepos/r2")]
        );
        assert_eq!(fx.gateway.registered_ids(), ["r1", "r2"]);
        assert!(!fx.root().join("hostRepos/r4").exists());
        assert_eq!(fx.mounter.mounted.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_mount_is_neither_recorded_nor_registered() {
        let one = host_repo(false);
        let two = host_repo(false);
        let mut fx = Fixture::new(RecordingGateway::default());
        fx.mounter.fail_source = Some(two.path().to_path_buf());
        let profile = Profile::default()
            .with_repo(Repo::local("a", one.path().to_str().unwrap(), false))
            .with_repo(Repo::local("b", two.path().to_str().unwrap(), false));

        let (result, _) = fx.reconcile(&profile);

        assert!(matches!(result, Err(RepoError::Mount { ref repo, .. }) if repo == "b"));
        assert_eq!(fx.session.mounts.len(), 1);
        assert_eq!(fx.gateway.registered_ids(), ["a"]);
    }

    #[test]
    fn failed_registration_names_the_repo() {
        let mut fx = Fixture::new(RecordingGateway {
            fail_add: Some("b".into()),
            ..Default::default()
        });
        let profile = Profile::default()
            .with_repo(Repo::remote("a", "http://a"))
            .with_repo(Repo::remote("b", "http://b"))
            .with_repo(Repo::remote("c", "http://c"));

        let (result, journal) = fx.reconcile(&profile);

        assert!(matches!(result, Err(RepoError::Gateway { ref repo, .. }) if repo == "b"));
        assert_eq!(fx.gateway.registered_ids(), ["a"]);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn list_failure_is_surfaced_before_any_change() {
        let mut gateway = MockPackageManager::new();
        gateway
            .expect_list_repos()
            .times(1)
            .returning(|| Err(GatewayError::Parse("garbage".into())));
        gateway.expect_remove_repo().never();
        gateway.expect_add_repo().never();

        let root = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let runner = FakeRunner::default();
        let mut reconciler = Reconciler::new(
            gateway,
            MountTracker::new(&mounter, "/hostRepos"),
            &runner,
            PackageManagerConfig::default(),
        );
        let mut session = SandboxSession::new(root.path());
        let profile = Profile {
            remove_repos: vec!["*".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("stable", "http://example/repo"));

        let err = reconciler
            .reconcile(&profile, &mut session, &ProcessHandle::new())
            .unwrap_err();
        assert!(matches!(err, RepoError::Gateway { .. }));
        assert!(reconciler.journal().is_empty());
    }

    #[test]
    fn explicit_unknown_removal_is_delegated_to_gateway() {
        let mut gateway = MockPackageManager::new();
        gateway.expect_list_repos().returning(|| Ok(Vec::new()));
        gateway
            .expect_remove_repo()
            .withf(|id| id == "ghost")
            .times(1)
            .returning(|id| Err(GatewayError::Rejected(format!("no repository named '{id}'"))));
        gateway.expect_add_repo().never();

        let root = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let runner = FakeRunner::default();
        let mut reconciler = Reconciler::new(
            gateway,
            MountTracker::new(&mounter, "/hostRepos"),
            &runner,
            PackageManagerConfig::default(),
        );
        let profile = Profile {
            remove_repos: vec!["ghost".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("stable", "http://example/repo"));

        let err = reconciler
            .reconcile(
                &profile,
                &mut SandboxSession::new(root.path()),
                &ProcessHandle::new(),
            )
            .unwrap_err();
        assert_eq!(err.repo(), "ghost");
    }

    #[test]
    fn cancelled_pass_stops_before_next_step() {
        let handle = ProcessHandle::new();
        let supervisor = handle.clone();
        let mut gateway = MockPackageManager::new();
        gateway.expect_list_repos().returning(|| {
            Ok(vec![
                RegisteredRepo {
                    id: "a".into(),
                    uri: "http://example/a".into(),
                },
                RegisteredRepo {
                    id: "b".into(),
                    uri: "http://example/b".into(),
                },
            ])
        });
        gateway
            .expect_remove_repo()
            .withf(|id| id == "a")
            .times(1)
            .returning(move |_| {
                supervisor.cancel().unwrap();
                Ok(())
            });
        gateway.expect_add_repo().never();

        let root = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let runner = FakeRunner::default();
        let mut reconciler = Reconciler::new(
            gateway,
            MountTracker::new(&mounter, "/hostRepos"),
            &runner,
            PackageManagerConfig::default(),
        );
        let profile = Profile {
            remove_repos: vec!["*".into()],
            ..Default::default()
        }
        .with_repo(Repo::remote("stable", "http://example/repo"));

        let err = reconciler
            .reconcile(&profile, &mut SandboxSession::new(root.path()), &handle)
            .unwrap_err();
        assert!(matches!(err, RepoError::Interrupted { ref repo } if repo == "b"));
        assert_eq!(reconciler.journal(), [AppliedStep::Removed { id: "a".into() }]);
    }

    #[test]
    fn cancelled_before_additions_registers_nothing() {
        let mut fx = Fixture::new(RecordingGateway::default());
        fx.handle.cancel().unwrap();
        let profile = Profile::default().with_repo(Repo::remote("stable", "http://x"));

        let (result, journal) = fx.reconcile(&profile);
        assert!(matches!(result, Err(RepoError::Interrupted { ref repo }) if repo == "stable"));
        assert!(journal.is_empty());
        assert_eq!(fx.gateway.calls(), [Call::List]);
    }

    #[test]
    fn warning_display_mentions_repo() {
        let warning = Warning::MissingIndex {
            repo: "dev".into(),
            path: PathBuf::from("/sb/hostRepos/dev/eopkg-index.xml.xz"),
        };
        let text = warning.to_string();
        assert!(text.contains("'dev'"));
        assert!(text.contains("/sb/hostRepos/dev/eopkg-index.xml.xz"));
    }
}
