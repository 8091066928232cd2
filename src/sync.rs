//! Per-site synchronizer
//!
//! Each admitted site runs one background loop that wakes on a fixed
//! interval and mirrors the remote branch tip into the local clone:
//!
//! ```text
//! Uninitialized ──open/clone──▶ Idle ◀──▶ Fetching
//! ```
//!
//! Health is a flag over `Idle`/`Fetching`: any failure marks the site
//! unhealthy and the same work is retried on the next tick.

use crate::error::Result;
use crate::git::{remote_ref, GitAuth, GitRepo};
use crate::site::Site;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Interval between scheduled syncs
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);

impl Site {
    fn git_auth(&self) -> GitAuth {
        match self.spec().ssh_key() {
            Some(key) => GitAuth::ssh_key(key),
            None => GitAuth::anonymous(),
        }
    }

    /// Run one sync and record its outcome in the health flag.
    ///
    /// Waits for any sync already in progress on this site.
    pub async fn update(&self) -> Result<()> {
        debug!(site = %self, "Updating repo");
        let mut state = self.sync.lock().await;
        if state.retired {
            debug!(site = %self, "Skipping update of removed site");
            return Ok(());
        }

        let result = self.sync_locked(&mut state.repo).await;
        match &result {
            Ok(()) => {
                self.set_healthy(true);
                debug!(site = %self, "Updated repo");
            }
            Err(e) => {
                self.set_healthy(false);
                warn!(site = %self, error = %e, "Unable to update repo");
            }
        }
        result
    }

    async fn sync_locked(&self, repo: &mut Option<GitRepo>) -> Result<()> {
        if repo.is_none() {
            *repo = Some(self.open_or_clone().await?);
        }
        let Some(repo) = repo.as_ref() else {
            return Ok(());
        };

        let branch = &self.spec().branch;
        repo.fetch(branch).await?;

        let current = repo.head().await?;
        let target = repo.rev_parse(&remote_ref(branch)).await?;
        repo.reset_hard(&target).await?;

        if current != target {
            info!(site = %self, from = %current, to = %target, "Updated repo to new commit");
        }
        Ok(())
    }

    async fn open_or_clone(&self) -> Result<GitRepo> {
        let auth = self.git_auth();
        if let Some(repo) = GitRepo::open(self.clone_to(), auth.clone()).await? {
            return Ok(repo);
        }

        info!(site = %self, path = %self.clone_to().display(), "Started initial clone of repo");
        let repo =
            GitRepo::clone_branch(&self.spec().git_url, &self.spec().branch, self.clone_to(), auth)
                .await?;
        info!(site = %self, "Completed initial clone of repo");
        Ok(repo)
    }

    /// Delete the local clone once any sync in progress has finished.
    ///
    /// The site is retired afterwards: a sync loop that wakes late will not
    /// clone it again.
    pub(crate) async fn remove_clone(&self) {
        let mut state = self.sync.lock().await;
        state.retired = true;
        state.repo = None;
        match tokio::fs::remove_dir_all(self.clone_to()).await {
            Ok(()) => debug!(path = %self.clone_to().display(), "Removed clone"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.clone_to().display(),
                error = %e,
                "Failed to remove clone"
            ),
        }
    }

    /// Launch the background sync loop.
    ///
    /// Starting a site that is already running replaces its stop signal, which
    /// ends the previous loop.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop.lock() = Some(stop_tx);

        let site = Arc::clone(self);
        tokio::spawn(async move {
            sync_loop(site, interval, stop_rx).await;
        });
    }

    /// Signal the sync loop to exit at its next wake.
    ///
    /// A sync already in progress runs to completion. The stop channel is
    /// discarded so the site can be started again.
    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop.lock().take() {
            info!(site = %self, "Stopping watch on repo");
            let _ = stop_tx.send(true);
        }
    }

    /// Whether a sync loop has been started and not stopped
    pub fn is_running(&self) -> bool {
        self.stop.lock().is_some()
    }
}

async fn sync_loop(site: Arc<Site>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if *stop_rx.borrow() {
                    info!(site = %site, "Stopped watch on repo");
                    return;
                }
                // Failures are recorded on the site and retried next tick
                let _ = site.update().await;
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!(site = %site, "Stopped watch on repo");
                    return;
                }
            }
        }
    }
}
