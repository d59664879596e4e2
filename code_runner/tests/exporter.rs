use async_trait::async_trait;
use chrono::{DateTime, Utc};
use code_runner::exporter::{
    ExportError, GitVersionControl, RepositoryExporter, RevisionInfo, VcsError, VersionControl,
};
use code_runner::workspace::LocalWorkspace;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use util::test_helpers::{list_files, write_file};

/// Writes a fixed tree, or fails for repositories named `broken`.
struct FakeVcs;

#[async_trait]
impl VersionControl for FakeVcs {
    async fn export(
        &self,
        repo_name: &str,
        _revision: Option<&str>,
        destination: &Path,
    ) -> Result<(), VcsError> {
        if repo_name == "broken" {
            return Err(VcsError::RepositoryNotFound(repo_name.to_string()));
        }
        write_file(destination, "A1/Main.java", "class Main {}");
        write_file(destination, "A1/README", "readme");
        Ok(())
    }

    async fn latest_revision(&self, _repo_name: &str) -> Result<Option<RevisionInfo>, VcsError> {
        Ok(None)
    }

    async fn revision_at(
        &self,
        _repo_name: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<RevisionInfo>, VcsError> {
        Ok(None)
    }
}

fn exporter() -> RepositoryExporter {
    RepositoryExporter::new(Arc::new(FakeVcs), Arc::new(LocalWorkspace))
}

#[tokio::test]
async fn reexport_over_stale_tree_is_idempotent() {
    let root = TempDir::new().unwrap();
    let fresh = root.path().join("fresh");
    let stale = root.path().join("stale");
    write_file(&stale, "A1/Old.java", "old");
    write_file(&stale, "leftover.txt", "x");

    exporter().export("group_1", None, &fresh).await.unwrap();
    let returned = exporter().export("group_1", None, &stale).await.unwrap();

    assert_eq!(returned, stale);
    assert_eq!(list_files(&fresh), list_files(&stale));
    assert_eq!(list_files(&stale), vec!["A1/Main.java", "A1/README"]);
}

#[tokio::test]
async fn version_control_errors_become_export_failures() {
    let root = TempDir::new().unwrap();
    let dest = root.path().join("out");

    let err = exporter().export("broken", None, &dest).await.unwrap_err();
    let ExportError::ExportFailure { repo_name, destination, source } = err;
    assert_eq!(repo_name, "broken");
    assert_eq!(destination, dest);
    assert!(matches!(source, VcsError::RepositoryNotFound(_)));
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

#[tokio::test]
async fn git_backend_exports_latest_tree() {
    if !git_available() {
        return;
    }

    let root = TempDir::new().unwrap();
    let repos = root.path().join("repos");
    let repo = repos.join("group_0001");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);

    let vcs = GitVersionControl::new(&repos);
    assert!(vcs.latest_revision("group_0001").await.unwrap().is_none());
    assert!(matches!(
        vcs.export("group_0001", None, &root.path().join("empty")).await,
        Err(VcsError::NoRevision(_))
    ));

    write_file(&repo, "A1/Main.java", "class Main {}");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "first"]);

    let latest = vcs.latest_revision("group_0001").await.unwrap().unwrap();
    assert_eq!(latest.identifier.len(), 40);
    let at = vcs
        .revision_at("group_0001", Utc::now() + chrono::Duration::minutes(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at, latest);

    let dest = root.path().join("export");
    RepositoryExporter::new(Arc::new(vcs), Arc::new(LocalWorkspace))
        .export("group_0001", None, &dest)
        .await
        .unwrap();
    assert_eq!(list_files(&dest), vec!["A1/Main.java"]);

    assert!(matches!(
        GitVersionControl::new(&repos).latest_revision("nope").await,
        Err(VcsError::RepositoryNotFound(_))
    ));
}
