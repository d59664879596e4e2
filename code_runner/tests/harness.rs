use code_runner::harness::{HarnessInvoker, HarnessSettings, ScriptArg};
use code_runner::workspace::LocalWorkspace;
use db::models::test_result::RunStatus;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use util::test_helpers::write_file;

/// Harness that echoes its arguments and exits with the code stored in `exit_code`.
const ECHO_HARNESS: &str = r#"#!/bin/sh
echo "args: $*"
echo "diagnostic" >&2
test -d src || exit 9
exit "$(cat exit_code)"
"#;

struct Fixture {
    _root: TempDir,
    sandbox: std::path::PathBuf,
    run_root: std::path::PathBuf,
    tests_root: std::path::PathBuf,
}

fn fixture(harness: &str, exit_code: i32) -> Fixture {
    let root = TempDir::new().unwrap();
    let sandbox = root.path().join("sandbox");
    write_file(&sandbox, "harness.sh", harness);
    write_file(&sandbox, "exit_code", &exit_code.to_string());
    write_file(&sandbox, "src/Main.java", "class Main {}");

    Fixture {
        sandbox,
        run_root: root.path().join("runs"),
        tests_root: root.path().join("automated_tests"),
        _root: root,
    }
}

fn invoker(f: &Fixture, timeout: Duration) -> HarnessInvoker {
    HarnessInvoker::new(
        HarnessSettings {
            harness_name: "harness.sh".into(),
            interpreter: Some("sh".into()),
            timeout,
            verbose_flag: "--verbose".into(),
            run_root: f.run_root.clone(),
            diagnostics_root: f.tests_root.clone(),
        },
        Arc::new(LocalWorkspace),
    )
}

fn scripts() -> Vec<ScriptArg> {
    vec![
        ScriptArg { name: "compile.sh".into(), halts_testing: true },
        ScriptArg { name: "unit tests.sh".into(), halts_testing: false },
    ]
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn successful_run_forwards_ordered_arguments() {
    let f = fixture(ECHO_HARNESS, 0);
    let out = invoker(&f, Duration::from_secs(10))
        .run("ok", &f.sandbox, &scripts())
        .await;

    assert!(out.succeeded);
    assert_eq!(out.status, RunStatus::Success);
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(out.stdout.trim(), "args: compile.sh true unit tests.sh false");
    assert!(out.verbose.is_none());

    let diagnostics = out.diagnostics_dir.expect("diagnostics written");
    assert!(diagnostics.starts_with(f.tests_root.join("test_runs")));
    assert_eq!(read(&diagnostics.join("output.txt")), out.stdout);
    assert_eq!(read(&diagnostics.join("error.txt")).trim(), "diagnostic");

    assert!(!f.run_root.join("box").join("run_ok").exists());
}

#[tokio::test]
async fn failing_tests_trigger_one_verbose_rerun() {
    let f = fixture(ECHO_HARNESS, 1);
    let out = invoker(&f, Duration::from_secs(10))
        .run("failed", &f.sandbox, &scripts())
        .await;

    assert!(!out.succeeded);
    assert_eq!(out.status, RunStatus::Failed);
    let verbose = out.verbose.expect("verbose re-run");
    assert!(verbose.stdout.contains("args: --verbose compile.sh"));

    let diagnostics = out.diagnostics_dir.unwrap();
    assert!(diagnostics.join("verbose_output.txt").exists());
    assert!(diagnostics.join("verbose_error.txt").exists());
}

#[tokio::test]
async fn other_exit_codes_are_errors_without_rerun() {
    let f = fixture(ECHO_HARNESS, 3);
    let out = invoker(&f, Duration::from_secs(10))
        .run("error", &f.sandbox, &scripts())
        .await;

    assert_eq!(out.status, RunStatus::Error);
    assert_eq!(out.exit_code, Some(3));
    assert!(out.verbose.is_none());
}

#[tokio::test]
async fn harness_runs_inside_copy_of_sandbox() {
    let f = fixture(ECHO_HARNESS, 0);
    std::fs::remove_dir_all(f.sandbox.join("src")).unwrap();

    let out = invoker(&f, Duration::from_secs(10))
        .run("nosrc", &f.sandbox, &scripts())
        .await;

    assert_eq!(out.exit_code, Some(9));
    assert_eq!(out.status, RunStatus::Error);
}

#[tokio::test]
async fn slow_harness_times_out() {
    let f = fixture("#!/bin/sh\nsleep 5\n", 0);
    let out = invoker(&f, Duration::from_millis(200))
        .run("slow", &f.sandbox, &scripts())
        .await;

    assert_eq!(out.status, RunStatus::Error);
    assert_eq!(out.exit_code, None);
    assert!(out.stderr.contains("did not finish"));
}

#[tokio::test]
async fn missing_sandbox_short_circuits() {
    let f = fixture(ECHO_HARNESS, 0);
    let missing = f.sandbox.join("does-not-exist");
    let out = invoker(&f, Duration::from_secs(10))
        .run("missing", &missing, &scripts())
        .await;

    assert!(!out.succeeded);
    assert_eq!(out.status, RunStatus::Error);
    assert!(out.stderr.contains("failed to prepare run directory"));
    assert!(out.diagnostics_dir.is_none());
}

#[tokio::test]
async fn timeout_kills_processes_started_by_harness() {
    let marker_dir = TempDir::new().unwrap();
    let marker = marker_dir.path().join("still_running");
    let harness = format!("#!/bin/sh\nsh -c 'sleep 2; touch {}'\n", marker.display());
    let f = fixture(&harness, 0);

    let out = invoker(&f, Duration::from_millis(300))
        .run("runaway", &f.sandbox, &scripts())
        .await;
    assert_eq!(out.status, RunStatus::Error);
    assert!(out.stderr.contains("did not finish"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "child of the harness outlived the timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_workers_never_share_diagnostics() {
    let f = fixture("#!/bin/sh\npwd\n", 0);
    let inv = invoker(&f, Duration::from_secs(10));

    for _ in 0..5 {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let inv = inv.clone();
                let sandbox = f.sandbox.clone();
                tokio::spawn(async move {
                    inv.run(&uuid::Uuid::new_v4().to_string(), &sandbox, &[]).await
                })
            })
            .collect();

        let mut dirs = Vec::new();
        for handle in handles {
            let out = handle.await.unwrap();
            assert!(out.succeeded);
            let dir = out.diagnostics_dir.expect("diagnostics written");
            assert_eq!(read(&dir.join("output.txt")), out.stdout);
            dirs.push(dir);
        }

        let total = dirs.len();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), total);
    }
}

#[tokio::test]
async fn concurrent_runs_use_separate_directories() {
    let f = fixture(ECHO_HARNESS, 0);
    let inv = invoker(&f, Duration::from_secs(10));

    let (id_a, id_b) = (uuid::Uuid::new_v4().to_string(), uuid::Uuid::new_v4().to_string());
    let (scripts_a, scripts_b) = (scripts(), scripts());
    let (a, b) = tokio::join!(
        inv.run(&id_a, &f.sandbox, &scripts_a),
        inv.run(&id_b, &f.sandbox, &scripts_b),
    );

    assert!(a.succeeded && b.succeeded);
    assert_ne!(a.diagnostics_dir, b.diagnostics_dir);
}
