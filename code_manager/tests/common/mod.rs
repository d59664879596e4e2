#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use code_manager::pipeline::{PipelineSettings, TestRunPipeline};
use code_runner::{LocalWorkspace, RevisionInfo, VcsError, VersionControl};
use db::models::test_script::{self, ScriptFlags};
use db::models::{assignment, grouping, grouping_membership, token, user};
use db::test_utils::setup_test_db;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use util::test_helpers::write_file;

/// Harness used by the tests. Lists the visible scripts on stderr, prints the
/// assignment's canned report and exits with the code in `exit_code` (0 if absent).
/// A `delay` file makes it sleep that many seconds first.
pub const HARNESS: &str = r#"#!/bin/sh
test -d src || { echo "source missing" >&2; exit 2; }
if [ -f delay ]; then sleep "$(cat delay)"; fi
echo "args: $*" >&2
ls test >&2
cat report.json
if [ -f exit_code ]; then exit "$(cat exit_code)"; fi
exit 0
"#;

pub const PASSING_REPORT: &str = r#"{"testrun":{"test_script":{"script_name":"t1.sh","test":[
    {"name":"case1","status":"pass","input":"1 2","expected":"3","actual":"3","marks_earned":2},
    {"name":"case2","status":"pass","marks_earned":1}
]}}}"#;

pub const FAILING_REPORT: &str = r#"{"testrun":{"test_script":{"script_name":"t1.sh","test":[
    {"name":"case1","status":"pass","marks_earned":2},
    {"name":"case2","status":"fail","marks_earned":0}
]}}}"#;

pub fn due_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 17, 0, 0).unwrap()
}

/// In-memory repositories: every repository holds one revision, committed an hour
/// before the due date unless moved, containing `<folder>/Main.java` for each folder.
pub struct FakeVcs {
    folders: Vec<String>,
    broken: Mutex<HashSet<String>>,
    committed_at: Mutex<DateTime<Utc>>,
}

impl FakeVcs {
    pub fn new(folders: &[&str]) -> Self {
        Self {
            folders: folders.iter().map(|f| f.to_string()).collect(),
            broken: Mutex::new(HashSet::new()),
            committed_at: Mutex::new(due_date() - chrono::Duration::hours(1)),
        }
    }

    pub fn break_repo(&self, repo_name: &str) {
        self.broken.lock().unwrap().insert(repo_name.to_string());
    }

    pub fn commit_at(&self, at: DateTime<Utc>) {
        *self.committed_at.lock().unwrap() = at;
    }

    fn revision(&self) -> RevisionInfo {
        RevisionInfo {
            identifier: "rev-1".into(),
            timestamp: *self.committed_at.lock().unwrap(),
        }
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn export(
        &self,
        repo_name: &str,
        _revision: Option<&str>,
        destination: &Path,
    ) -> Result<(), VcsError> {
        if self.broken.lock().unwrap().contains(repo_name) {
            return Err(VcsError::RepositoryNotFound(repo_name.to_string()));
        }
        for folder in &self.folders {
            write_file(destination, &format!("{folder}/Main.java"), "class Main {}");
        }
        Ok(())
    }

    async fn latest_revision(&self, _repo_name: &str) -> Result<Option<RevisionInfo>, VcsError> {
        Ok(Some(self.revision()))
    }

    async fn revision_at(
        &self,
        _repo_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<RevisionInfo>, VcsError> {
        let revision = self.revision();
        Ok((revision.timestamp <= at).then_some(revision))
    }
}

pub struct Fixture {
    pub root: TempDir,
    pub db: DatabaseConnection,
    pub vcs: Arc<FakeVcs>,
    pub pipeline: Arc<TestRunPipeline>,
    pub tests_root: PathBuf,
    pub run_root: PathBuf,
}

pub async fn fixture(folders: &[&str]) -> Fixture {
    let root = TempDir::new().unwrap();
    let tests_root = root.path().join("automated_tests");
    let run_root = root.path().join("runs");
    let harness_path = root.path().join("tools/harness.sh");
    write_file(root.path(), "tools/harness.sh", HARNESS);

    let db = setup_test_db().await;
    let vcs = Arc::new(FakeVcs::new(folders));
    let settings = PipelineSettings {
        tests_root: tests_root.clone(),
        run_root: run_root.clone(),
        harness_path,
        harness_interpreter: Some("sh".into()),
        harness_timeout: Duration::from_secs(20),
        verbose_flag: "--verbose".into(),
    };
    let pipeline = Arc::new(TestRunPipeline::new(
        db.clone(),
        settings,
        vcs.clone(),
        Arc::new(LocalWorkspace),
    ));

    Fixture {
        root,
        db,
        vcs,
        pipeline,
        tests_root,
        run_root,
    }
}

impl Fixture {
    /// Writes the assignment's test assets: the harness report, an optional exit code
    /// and one file per script under `test/`.
    pub fn write_assets(&self, short: &str, report: &str, exit_code: Option<i32>, scripts: &[&str]) {
        let dir = self.tests_root.join(short);
        write_file(&dir, "report.json", report);
        if let Some(code) = exit_code {
            write_file(&dir, "exit_code", &code.to_string());
        }
        for script in scripts {
            write_file(&dir, &format!("test/{script}"), "#!/bin/sh\n");
        }
    }

    pub async fn assignment(&self, short: &str, rule: serde_json::Value) -> assignment::Model {
        let a = assignment::Model::create(&self.db, short, short, due_date(), rule)
            .await
            .unwrap();
        assignment::Model::configure_testing(&self.db, a.id, true, false, 3)
            .await
            .unwrap();
        assignment::Model::get_by_id(&self.db, a.id).await.unwrap().unwrap()
    }

    pub async fn no_late(&self, short: &str) -> assignment::Model {
        self.assignment(short, json!({"type": "no_late"})).await
    }

    pub async fn script(&self, assignment_id: i64, name: &str, seq: i64, is_private: bool) {
        let flags = ScriptFlags {
            run_on_submission: true,
            run_on_request: true,
            halts_testing: false,
            is_private,
        };
        test_script::Model::create(&self.db, assignment_id, name, seq, flags)
            .await
            .unwrap();
    }

    /// A grouping with one accepted student and a full token ledger.
    pub async fn grouping(&self, assignment_id: i64, name: &str) -> (grouping::Model, user::Model) {
        let g = grouping::Model::create(&self.db, assignment_id, name, name).await.unwrap();
        let student = user::Model::create(&self.db, &format!("{name}-student"), user::UserRole::Student, 2)
            .await
            .unwrap();
        grouping_membership::Model::create(
            &self.db,
            g.id,
            student.id,
            grouping_membership::MembershipStatus::Inviter,
        )
        .await
        .unwrap();
        token::Model::create(&self.db, g.id, 3, Utc::now().date_naive()).await.unwrap();
        (g, student)
    }
}
