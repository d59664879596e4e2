use chrono::{DateTime, Utc};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Create a directory (and all parents) if it doesn't exist, and return the path.
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let p = path.as_ref();
    fs::create_dir_all(p)?;
    Ok(p.to_path_buf())
}

/// Resolve a configured root against the current directory when it is relative.
pub fn resolve_root(root: &str) -> PathBuf {
    let p = PathBuf::from(root);
    if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    }
}

// ─── Automated-tests tree ───────────────────────────────────────────

/// Test assets of one assignment: {TESTS_ROOT}/{short_identifier}
pub fn assignment_tests_dir(tests_root: &Path, short_identifier: &str) -> PathBuf {
    tests_root.join(short_identifier)
}

/// Test scripts of one assignment: {TESTS_ROOT}/{short_identifier}/test
pub fn assignment_scripts_dir(tests_root: &Path, short_identifier: &str) -> PathBuf {
    assignment_tests_dir(tests_root, short_identifier).join("test")
}

/// Diagnostics of all harness runs: {TESTS_ROOT}/test_runs
pub fn test_runs_dir(tests_root: &Path) -> PathBuf {
    tests_root.join("test_runs")
}

/// Diagnostics of one harness run, keyed by its start time in epoch seconds.
pub fn test_run_diagnostics_dir(tests_root: &Path, started_at: DateTime<Utc>) -> PathBuf {
    test_runs_dir(tests_root).join(format!("test_run_{}", started_at.timestamp()))
}

// ─── Per-run working directories ────────────────────────────────────

/// Scratch space owned by a single run: {RUN_ROOT}/scratch/run_{run_id}
pub fn run_scratch_dir(run_root: &Path, run_id: &str) -> PathBuf {
    run_root.join("scratch").join(format!("run_{run_id}"))
}

/// Directory the harness executes in: {RUN_ROOT}/box/run_{run_id}
pub fn run_execution_dir(run_root: &Path, run_id: &str) -> PathBuf {
    run_root.join("box").join(format!("run_{run_id}"))
}
