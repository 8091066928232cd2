//! Site records
//!
//! A [`SiteSpec`] is the persisted, user-supplied definition of a tenant. A
//! [`Site`] is an admitted tenant: its normalized spec, the derived clone
//! path, and the runtime state owned by its synchronizer.

use crate::git::GitRepo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Default branch mirrored when none is given
pub const DEFAULT_BRANCH: &str = "master";

/// Default subpath served when none is given
pub const DEFAULT_ROOT: &str = "/";

/// Tenant definition as accepted by the API and stored in the snapshot.
///
/// Every field defaults to empty so that partial or legacy records can be
/// loaded and then normalized by the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSpec {
    pub id: String,
    pub name: String,
    pub hostnames: Vec<String>,
    #[serde(rename = "git_repo")]
    pub git_url: String,
    pub branch: String,
    pub root: String,
    pub delete_password: String,
    pub access_username: String,
    pub access_password: String,
    pub ssh_key: String,
}

impl SiteSpec {
    /// Basic-auth credentials gating the site's content, if both are set
    pub fn access_credentials(&self) -> Option<(&str, &str)> {
        if self.access_username.is_empty() || self.access_password.is_empty() {
            None
        } else {
            Some((&self.access_username, &self.access_password))
        }
    }

    pub fn ssh_key(&self) -> Option<&str> {
        if self.ssh_key.is_empty() {
            None
        } else {
            Some(&self.ssh_key)
        }
    }
}

/// Redacted view of a site, safe to return from the public API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePublic {
    pub id: String,
    pub name: String,
    pub hostnames: Vec<String>,
    pub git_repo: String,
    pub branch: String,
    pub root: String,
    pub healthy: bool,
    pub has_delete_password: bool,
}

/// State guarded by the site's sync lock.
///
/// Holding the lock is what makes a sync exclusive: every git operation on
/// the clone runs while the guard is held.
#[derive(Default)]
pub(crate) struct SyncState {
    pub(crate) repo: Option<GitRepo>,
    /// Set once the clone has been removed; later syncs are no-ops
    pub(crate) retired: bool,
}

/// An admitted tenant.
///
/// Locking: `sync` serializes all git operations on `clone_to` and owns the
/// repository handle. `healthy` is only written while `sync` is held but may
/// be read lock-free. `stop` holds the synchronizer's stop signal and is only
/// touched by [`Site::start`] and [`Site::stop`].
pub struct Site {
    spec: SiteSpec,
    clone_to: PathBuf,
    pub(crate) sync: tokio::sync::Mutex<SyncState>,
    pub(crate) healthy: AtomicBool,
    pub(crate) stop: Mutex<Option<watch::Sender<bool>>>,
}

impl Site {
    /// Wrap a validated spec. `clone_to` is derived by the registry and never persisted.
    pub fn new(spec: SiteSpec, clone_to: PathBuf) -> Self {
        Self {
            spec,
            clone_to,
            sync: tokio::sync::Mutex::new(SyncState::default()),
            healthy: AtomicBool::new(false),
            stop: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &SiteSpec {
        &self.spec
    }

    pub fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }

    pub fn clone_to(&self) -> &Path {
        &self.clone_to
    }

    /// Outcome of the most recent sync
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Directory served for this site: the clone joined with `root`.
    ///
    /// A root of `/` (or empty) serves the clone itself.
    pub fn serve_dir(&self) -> PathBuf {
        let root = self.spec.root.trim_matches('/');
        if root.is_empty() {
            self.clone_to.clone()
        } else {
            self.clone_to.join(root)
        }
    }

    pub fn public_repr(&self) -> SitePublic {
        SitePublic {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            hostnames: self.spec.hostnames.clone(),
            git_repo: self.spec.git_url.clone(),
            branch: self.spec.branch.clone(),
            root: self.spec.root.clone(),
            healthy: self.is_healthy(),
            has_delete_password: !self.spec.delete_password.is_empty(),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Repo remote={} branch={}>",
            self.spec.git_url, self.spec.branch
        )
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("id", &self.spec.id)
            .field("hostnames", &self.spec.hostnames)
            .field("git_repo", &self.spec.git_url)
            .field("branch", &self.spec.branch)
            .field("clone_to", &self.clone_to)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
