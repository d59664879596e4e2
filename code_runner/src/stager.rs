//! Sandbox assembly.
//!
//! A staged sandbox has this layout:
//!
//! ```text
//! <sandbox>/
//!   src/          exported student code
//!   test/         test scripts (private ones removed for students)
//!   lib/          support libraries, copied verbatim
//!   parse/        output post-processors, copied verbatim
//!   <harness>     the test harness executable
//!   ...           build and metadata files from the assignment's asset directory
//! ```

use crate::workspace::Workspace;
use db::models::test_script;
use db::models::user::UserRole;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const SOURCE_DIR: &str = "src";
pub const TEST_DIR: &str = "test";
pub const LIB_DIR: &str = "lib";
pub const PARSE_DIR: &str = "parse";

/// Who the sandbox is built for. Students never see private scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Student,
    Staff,
}

impl From<UserRole> for Audience {
    fn from(role: UserRole) -> Self {
        if role.is_privileged() {
            Audience::Staff
        } else {
            Audience::Student
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingFailureReason {
    SourceMissing,
    AssetsMissing,
    HarnessMissing,
    /// The assignment has no test scripts configured.
    ScriptsMissing,
}

impl fmt::Display for StagingFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StagingFailureReason::SourceMissing => "source_missing",
            StagingFailureReason::AssetsMissing => "assets_missing",
            StagingFailureReason::HarnessMissing => "harness_missing",
            StagingFailureReason::ScriptsMissing => "scripts_missing",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging failed ({reason}): {} does not exist", path.display())]
    StagingFailure {
        reason: StagingFailureReason,
        path: PathBuf,
    },

    #[error("staging failed while copying {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    pub fn missing(reason: StagingFailureReason, path: &Path) -> Self {
        StagingError::StagingFailure {
            reason,
            path: path.to_path_buf(),
        }
    }
}

/// Inputs of one staging operation.
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    /// The assignment's test-asset directory.
    pub assets_dir: &'a Path,
    /// Exported student code for this assignment.
    pub source_dir: &'a Path,
    pub sandbox_dir: &'a Path,
    pub harness_path: &'a Path,
    /// Every test script of the assignment, used to recognise private ones.
    pub scripts: &'a [test_script::Model],
    pub audience: Audience,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError {
    let path = path.to_path_buf();
    move |source| StagingError::Io { path, source }
}

#[derive(Clone)]
pub struct SandboxStager {
    workspace: Arc<dyn Workspace>,
}

impl SandboxStager {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }

    /// Fails with [`StagingFailureReason::AssetsMissing`] unless the asset directory
    /// exists. Used to refuse requests early, before any token is spent.
    pub fn check_assets(&self, assets_dir: &Path) -> Result<(), StagingError> {
        if self.workspace.is_dir(assets_dir) {
            Ok(())
        } else {
            Err(StagingError::missing(StagingFailureReason::AssetsMissing, assets_dir))
        }
    }

    pub fn stage(&self, req: &StageRequest<'_>) -> Result<PathBuf, StagingError> {
        let ws = self.workspace.as_ref();

        if !ws.is_dir(req.source_dir) {
            return Err(StagingError::missing(
                StagingFailureReason::SourceMissing,
                req.source_dir,
            ));
        }
        self.check_assets(req.assets_dir)?;
        if !ws.exists(req.harness_path) {
            return Err(StagingError::missing(
                StagingFailureReason::HarnessMissing,
                req.harness_path,
            ));
        }

        let sandbox = req.sandbox_dir;
        ws.clear(sandbox).map_err(io_err(sandbox))?;

        ws.copy_tree(req.source_dir, &sandbox.join(SOURCE_DIR))
            .map_err(io_err(req.source_dir))?;

        for entry in ws.list_dir(req.assets_dir).map_err(io_err(req.assets_dir))? {
            let from = req.assets_dir.join(&entry.name);
            let to = sandbox.join(&entry.name);
            match (entry.is_dir, entry.name.as_str()) {
                (true, TEST_DIR) => self.copy_scripts(&from, &to, req)?,
                (true, LIB_DIR) | (true, PARSE_DIR) => ws.copy_tree(&from, &to).map_err(io_err(&from))?,
                // Other directories are assignment configuration, not harness input.
                (true, _) => {}
                (false, _) => ws.copy_file(&from, &to).map_err(io_err(&from))?,
            }
        }

        let harness_name = req
            .harness_path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| StagingError::missing(StagingFailureReason::HarnessMissing, req.harness_path))?;
        ws.copy_file(req.harness_path, &sandbox.join(harness_name))
            .map_err(io_err(req.harness_path))?;

        debug!(sandbox = %sandbox.display(), audience = ?req.audience, "sandbox staged");
        Ok(sandbox.to_path_buf())
    }

    fn copy_scripts(&self, from: &Path, to: &Path, req: &StageRequest<'_>) -> Result<(), StagingError> {
        let ws = self.workspace.as_ref();

        if req.audience == Audience::Staff {
            return ws.copy_tree(from, to).map_err(io_err(from));
        }

        let private: HashSet<&str> = req
            .scripts
            .iter()
            .filter(|s| s.is_private)
            .map(|s| s.script_name.as_str())
            .collect();

        ws.create_dir_all(to).map_err(io_err(to))?;
        for entry in ws.list_dir(from).map_err(io_err(from))? {
            if private.contains(entry.name.as_str()) {
                continue;
            }
            let src = from.join(&entry.name);
            let dst = to.join(&entry.name);
            if entry.is_dir {
                ws.copy_tree(&src, &dst).map_err(io_err(&src))?;
            } else {
                ws.copy_file(&src, &dst).map_err(io_err(&src))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MemoryWorkspace;
    use chrono::Utc;

    fn script(name: &str, is_private: bool) -> test_script::Model {
        test_script::Model {
            id: 0,
            assignment_id: 1,
            script_name: name.to_string(),
            description: String::new(),
            seq_num: 0,
            run_on_submission: true,
            run_on_request: true,
            halts_testing: false,
            is_private,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn seeded() -> Arc<MemoryWorkspace> {
        let ws = Arc::new(MemoryWorkspace::new());
        for (path, contents) in [
            ("/assets/A1/build.xml", "<project/>"),
            ("/assets/A1/test/A.sh", "a"),
            ("/assets/A1/test/B.sh", "b"),
            ("/assets/A1/lib/junit.jar", "jar"),
            ("/assets/A1/parse/parse.rb", "p"),
            ("/assets/A1/config/ignored.yml", "x"),
            ("/export/A1/Main.java", "class Main {}"),
            ("/tools/harness.rb", "#!harness"),
        ] {
            ws.write_file(Path::new(path), contents.as_bytes()).unwrap();
        }
        ws
    }

    fn request<'a>(scripts: &'a [test_script::Model], audience: Audience) -> StageRequest<'a> {
        StageRequest {
            assets_dir: Path::new("/assets/A1"),
            source_dir: Path::new("/export/A1"),
            sandbox_dir: Path::new("/sandbox"),
            harness_path: Path::new("/tools/harness.rb"),
            scripts,
            audience,
        }
    }

    #[test]
    fn test_student_sandbox_excludes_private_scripts() {
        let ws = seeded();
        let scripts = vec![script("A.sh", false), script("B.sh", true)];
        let stager = SandboxStager::new(ws.clone());

        stager.stage(&request(&scripts, Audience::Student)).unwrap();

        assert_eq!(
            ws.files_under(Path::new("/sandbox")),
            vec![
                "build.xml",
                "harness.rb",
                "lib/junit.jar",
                "parse/parse.rb",
                "src/Main.java",
                "test/A.sh",
            ]
        );
    }

    #[test]
    fn test_staff_sandbox_includes_every_script() {
        let ws = seeded();
        let scripts = vec![script("A.sh", false), script("B.sh", true)];
        let stager = SandboxStager::new(ws.clone());

        stager.stage(&request(&scripts, Audience::Staff)).unwrap();

        let files = ws.files_under(Path::new("/sandbox"));
        assert!(files.contains(&"test/A.sh".to_string()));
        assert!(files.contains(&"test/B.sh".to_string()));
    }

    #[test]
    fn test_restaging_replaces_stale_content() {
        let ws = seeded();
        ws.write_file(Path::new("/sandbox/stale.txt"), b"old").unwrap();
        let stager = SandboxStager::new(ws.clone());

        stager.stage(&request(&[], Audience::Staff)).unwrap();
        assert!(!ws.exists(Path::new("/sandbox/stale.txt")));
    }

    #[test]
    fn test_missing_source_is_named() {
        let ws = seeded();
        ws.remove(Path::new("/export/A1")).unwrap();
        let stager = SandboxStager::new(ws);

        match stager.stage(&request(&[], Audience::Student)) {
            Err(StagingError::StagingFailure { reason, path }) => {
                assert_eq!(reason, StagingFailureReason::SourceMissing);
                assert_eq!(path, PathBuf::from("/export/A1"));
            }
            other => panic!("expected source_missing, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_assets_is_named() {
        let ws = seeded();
        ws.remove(Path::new("/assets/A1")).unwrap();
        let stager = SandboxStager::new(ws);

        let err = stager.stage(&request(&[], Audience::Student)).unwrap_err();
        assert!(matches!(
            err,
            StagingError::StagingFailure { reason: StagingFailureReason::AssetsMissing, .. }
        ));
        assert!(err.to_string().contains("/assets/A1"));
    }

    #[test]
    fn test_audience_from_role() {
        assert_eq!(Audience::from(UserRole::Student), Audience::Student);
        assert_eq!(Audience::from(UserRole::Grader), Audience::Staff);
        assert_eq!(Audience::from(UserRole::Admin), Audience::Staff);
    }
}
