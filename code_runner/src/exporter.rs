//! Repository export.
//!
//! [`RepositoryExporter`] materializes one group's repository into a clean directory.
//! The version-control system itself sits behind [`VersionControl`]; the default
//! implementation shells out to `git` against repositories stored under a common root.

use crate::workspace::Workspace;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// A revision of a group repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("repository '{0}' has no revisions")]
    NoRevision(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected output from version control: {0}")]
    UnexpectedOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read access to group repositories.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Writes the tree of `repo_name` at `revision` (latest when `None`) into
    /// `destination`, which already exists and is empty.
    async fn export(
        &self,
        repo_name: &str,
        revision: Option<&str>,
        destination: &Path,
    ) -> Result<(), VcsError>;

    /// Most recent revision, or `None` for an empty repository.
    async fn latest_revision(&self, repo_name: &str) -> Result<Option<RevisionInfo>, VcsError>;

    /// Most recent revision committed at or before `at`.
    async fn revision_at(
        &self,
        repo_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<RevisionInfo>, VcsError>;
}

/// [`VersionControl`] over git repositories stored as `<root>/<repo_name>`.
///
/// Both bare and non-bare repositories work since every command runs with `git -C`.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    repositories_root: PathBuf,
    git_binary: String,
}

impl GitVersionControl {
    pub fn new(repositories_root: impl Into<PathBuf>) -> Self {
        Self {
            repositories_root: repositories_root.into(),
            git_binary: "git".to_string(),
        }
    }

    fn repo_path(&self, repo_name: &str) -> Result<PathBuf, VcsError> {
        let path = self.repositories_root.join(repo_name);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(VcsError::RepositoryNotFound(repo_name.to_string()))
        }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<std::process::Output, VcsError> {
        debug!(repo = %repo.display(), ?args, "running git");
        let output = Command::new(&self.git_binary)
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    async fn git_checked(&self, repo: &Path, args: &[&str]) -> Result<Vec<u8>, VcsError> {
        let output = self.git(repo, args).await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(VcsError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn has_commits(&self, repo: &Path) -> Result<bool, VcsError> {
        let output = self.git(repo, &["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
        Ok(output.status.success())
    }

    async fn log_one(&self, repo: &Path, extra: &[&str]) -> Result<Option<RevisionInfo>, VcsError> {
        if !self.has_commits(repo).await? {
            return Ok(None);
        }

        let mut args = vec!["log", "-1", "--format=%H %ct"];
        args.extend_from_slice(extra);
        args.push("HEAD");

        let stdout = self.git_checked(repo, &args).await?;
        parse_log_line(&String::from_utf8_lossy(&stdout))
    }
}

/// Parses `"<hash> <unix seconds>"` as printed by `git log --format='%H %ct'`.
fn parse_log_line(line: &str) -> Result<Option<RevisionInfo>, VcsError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (Some(hash), Some(secs)) = (parts.next(), parts.next()) else {
        return Err(VcsError::UnexpectedOutput(line.to_string()));
    };
    let secs: i64 = secs
        .parse()
        .map_err(|_| VcsError::UnexpectedOutput(line.to_string()))?;
    let timestamp = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| VcsError::UnexpectedOutput(line.to_string()))?;

    Ok(Some(RevisionInfo {
        identifier: hash.to_string(),
        timestamp,
    }))
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn export(
        &self,
        repo_name: &str,
        revision: Option<&str>,
        destination: &Path,
    ) -> Result<(), VcsError> {
        let repo = self.repo_path(repo_name)?;
        if revision.is_none() && !self.has_commits(&repo).await? {
            return Err(VcsError::NoRevision(repo_name.to_string()));
        }

        let rev = revision.unwrap_or("HEAD");
        let archive = self.git_checked(&repo, &["archive", "--format=tar", rev]).await?;

        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || {
            tar::Archive::new(Cursor::new(archive)).unpack(&destination)
        })
        .await
        .map_err(|e| VcsError::Io(std::io::Error::other(e)))??;

        Ok(())
    }

    async fn latest_revision(&self, repo_name: &str) -> Result<Option<RevisionInfo>, VcsError> {
        let repo = self.repo_path(repo_name)?;
        self.log_one(&repo, &[]).await
    }

    async fn revision_at(
        &self,
        repo_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<RevisionInfo>, VcsError> {
        let repo = self.repo_path(repo_name)?;
        let before = format!("--before={}", at.timestamp());
        self.log_one(&repo, &[before.as_str()]).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export of '{repo_name}' into {destination} failed: {source}")]
    ExportFailure {
        repo_name: String,
        destination: PathBuf,
        #[source]
        source: VcsError,
    },
}

/// Exports group repositories into clean directories.
#[derive(Clone)]
pub struct RepositoryExporter {
    vcs: Arc<dyn VersionControl>,
    workspace: Arc<dyn Workspace>,
}

impl RepositoryExporter {
    pub fn new(vcs: Arc<dyn VersionControl>, workspace: Arc<dyn Workspace>) -> Self {
        Self { vcs, workspace }
    }

    pub fn version_control(&self) -> &Arc<dyn VersionControl> {
        &self.vcs
    }

    /// Exports `repo_name` at `revision` into `destination` and returns the destination.
    ///
    /// Any existing content at `destination` is deleted first, so re-exporting is
    /// idempotent.
    pub async fn export(
        &self,
        repo_name: &str,
        revision: Option<&str>,
        destination: &Path,
    ) -> Result<PathBuf, ExportError> {
        let fail = |source: VcsError| ExportError::ExportFailure {
            repo_name: repo_name.to_string(),
            destination: destination.to_path_buf(),
            source,
        };

        self.workspace
            .clear(destination)
            .map_err(|e| fail(VcsError::Io(e)))?;

        if let Err(e) = self.vcs.export(repo_name, revision, destination).await {
            warn!(repo = repo_name, error = %e, "repository export failed");
            return Err(fail(e));
        }

        Ok(destination.to_path_buf())
    }
}
