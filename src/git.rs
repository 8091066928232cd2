//! Git plumbing for mirroring a remote branch into a local clone
//!
//! Every operation shells out to the system `git` binary. Network commands
//! have no internal timeout; a hung remote only stalls the caller.

use crate::error::{Result, SiteError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Authentication used for network operations
#[derive(Clone, Default)]
pub struct GitAuth {
    ssh_key: Option<String>,
}

impl GitAuth {
    /// Anonymous (or HTTPS) access
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticate SSH remotes with an unencrypted private key
    pub fn ssh_key(key: impl Into<String>) -> Self {
        Self {
            ssh_key: Some(key.into()),
        }
    }

    /// Write the key to a private temp file and point `GIT_SSH_COMMAND` at it.
    ///
    /// The returned file must outlive the command.
    fn apply(&self, cmd: &mut Command) -> Result<Option<tempfile::NamedTempFile>> {
        let Some(key) = &self.ssh_key else {
            return Ok(None);
        };

        let mut file = tempfile::Builder::new().prefix("sitehost-key-").tempfile()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(key.as_bytes())?;
        if !key.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()?;

        cmd.env(
            "GIT_SSH_COMMAND",
            format!(
                "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new -o BatchMode=yes",
                file.path().display()
            ),
        );
        Ok(Some(file))
    }
}

impl std::fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitAuth")
            .field("ssh_key", &self.ssh_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Handle to a local clone
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    auth: GitAuth,
}

impl GitRepo {
    /// Open an existing clone. Returns `Ok(None)` if `path` is not a repository.
    pub async fn open(path: &Path, auth: GitAuth) -> Result<Option<Self>> {
        if !path.join(".git").is_dir() {
            return Ok(None);
        }
        let repo = Self {
            path: path.to_path_buf(),
            auth,
        };
        match repo.git(&["rev-parse", "--git-dir"]).await {
            Ok(_) => Ok(Some(repo)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Existing directory is not a usable repository");
                Ok(None)
            }
        }
    }

    /// Clone a single branch of `url` into `path`.
    ///
    /// Anything already at `path` is removed first, and a failed clone leaves
    /// nothing behind.
    pub async fn clone_branch(url: &str, branch: &str, path: &Path, auth: GitAuth) -> Result<Self> {
        if path.exists() {
            tokio::fs::remove_dir_all(path).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_arg = path.to_string_lossy();
        let result = run_git(
            None,
            &[
                "clone",
                "--branch",
                branch,
                "--single-branch",
                "--",
                url,
                &path_arg,
            ],
            &auth,
        )
        .await;

        if let Err(e) = result {
            if path.exists() {
                let _ = tokio::fs::remove_dir_all(path).await;
            }
            return Err(e);
        }

        Ok(Self {
            path: path.to_path_buf(),
            auth,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch `branch` from origin into `refs/remotes/origin/<branch>`.
    ///
    /// Nothing new on the remote is not an error.
    pub async fn fetch(&self, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:{}", remote_ref(branch));
        self.git(&["fetch", "--quiet", "origin", &refspec]).await?;
        Ok(())
    }

    /// Resolve a revision to a commit id
    pub async fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        self.git(&["rev-parse", "--verify", "--quiet", &spec])
            .await
            .map_err(|_| SiteError::Git(format!("unable to resolve {rev}")))
    }

    /// Commit currently checked out
    pub async fn head(&self) -> Result<String> {
        self.rev_parse("HEAD").await
    }

    /// Hard-reset the working tree to `commit`
    pub async fn reset_hard(&self, commit: &str) -> Result<()> {
        self.git(&["reset", "--hard", "--quiet", commit]).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.path), args, &self.auth).await
    }
}

/// Remote-tracking ref for `branch` on origin
pub fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{branch}")
}

async fn run_git(dir: Option<&Path>, args: &[&str], auth: &GitAuth) -> Result<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let _key_file = auth.apply(&mut cmd)?;

    let output = cmd
        .output()
        .await
        .map_err(|e| SiteError::Git(format!("failed to run git: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SiteError::Git(format!(
            "`git {}` exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            stderr.trim()
        )))
    }
}
