mod common;

use code_manager::manager::tracker::RunState;
use code_manager::pipeline::{PipelineError, TestRunJob};
use code_runner::{Audience, StagingError, StagingFailureReason};
use common::{fixture, FAILING_REPORT, PASSING_REPORT};
use db::models::submission;
use db::models::test_result::{self, CompletionStatus, RunStatus};
use db::models::test_script::RunTrigger;
use std::sync::Mutex;
use util::paths::test_runs_dir;
use util::test_helpers::list_files;

fn no_progress(_: RunState) {}

#[tokio::test]
async fn test_passing_run_is_persisted() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", PASSING_REPORT, None, &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let stages = Mutex::new(Vec::new());
    let record = |state: RunState| stages.lock().unwrap().push(state);
    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Student);
    let result = f.pipeline.execute(&job, &record).await.unwrap();

    assert_eq!(result.completion_status, CompletionStatus::Pass);
    assert_eq!(result.run_status, RunStatus::Success);
    assert_eq!(result.marks_earned, 3.0);
    assert_eq!(result.name, "t1.sh");
    assert!(result.test_script_id.is_some());
    assert_eq!(result.repo_revision.as_deref(), Some("rev-1"));
    assert_eq!(result.input_description, "t1.sh/case1: 1 2");
    assert!(result.raw_error.contains("args: t1.sh false"));

    assert_eq!(
        *stages.lock().unwrap(),
        vec![RunState::Exporting, RunState::Staging, RunState::Invoking, RunState::Parsing]
    );

    // scratch and run directories are gone, diagnostics stay
    assert!(list_files(&f.run_root).is_empty());
    let diagnostics = list_files(&test_runs_dir(&f.tests_root));
    assert!(diagnostics.iter().any(|p| p.ends_with("output.txt")));
}

#[tokio::test]
async fn test_failing_cases_fail_the_run() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", FAILING_REPORT, Some(1), &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let result = f.pipeline.execute(&job, &no_progress).await.unwrap();

    assert_eq!(result.marks_earned, 2.0);
    assert_eq!(result.completion_status, CompletionStatus::Fail);
    assert_eq!(result.run_status, RunStatus::Failed);

    let diagnostics = list_files(&test_runs_dir(&f.tests_root));
    assert!(diagnostics.iter().any(|p| p.ends_with("verbose_output.txt")));
}

#[tokio::test]
async fn test_result_references_current_submission() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", PASSING_REPORT, None, &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;
    let current = submission::Model::create_by_timestamp(&f.db, g.id, None, chrono::Utc::now())
        .await
        .unwrap();

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let result = f.pipeline.execute(&job, &no_progress).await.unwrap();
    assert_eq!(result.submission_id, Some(current.id));
}

#[tokio::test]
async fn test_private_scripts_hidden_from_students() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", PASSING_REPORT, None, &["public.sh", "secret.sh"]);
    f.script(a.id, "public.sh", 1, false).await;
    f.script(a.id, "secret.sh", 2, true).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let student = TestRunJob::new(g.id, RunTrigger::Request, Audience::Student);
    let result = f.pipeline.execute(&student, &no_progress).await.unwrap();
    assert!(result.raw_error.contains("public.sh"));
    assert!(!result.raw_error.contains("secret.sh"));

    let collection = TestRunJob::collection(g.id, None);
    let result = f.pipeline.execute(&collection, &no_progress).await.unwrap();
    assert!(result.raw_error.contains("secret.sh"));
}

#[tokio::test]
async fn test_scripts_passed_in_sequence_order() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", PASSING_REPORT, None, &["a.sh", "b.sh", "c.sh"]);
    f.script(a.id, "c.sh", 3, false).await;
    f.script(a.id, "a.sh", 1, false).await;
    f.script(a.id, "b.sh", 2, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let result = f.pipeline.execute(&job, &no_progress).await.unwrap();
    assert!(result.raw_error.contains("args: a.sh false b.sh false c.sh false"));
}

#[tokio::test]
async fn test_export_failure_records_diagnostic() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", PASSING_REPORT, None, &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;
    f.vcs.break_repo("g1");

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let err = f.pipeline.execute(&job, &no_progress).await.unwrap_err();
    assert!(matches!(err, PipelineError::Export(_)));
    assert!(err.is_setup_failure());

    let results = test_result::Model::get_by_grouping_id(&f.db, g.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].completion_status, CompletionStatus::Error);
    assert_eq!(results[0].run_status, RunStatus::Error);
    assert!(results[0].raw_error.contains("g1"));
    assert!(list_files(&f.run_root).is_empty());
}

#[tokio::test]
async fn test_missing_assets_fail_staging() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let err = f.pipeline.execute(&job, &no_progress).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Staging(StagingError::StagingFailure {
            reason: StagingFailureReason::AssetsMissing,
            ..
        })
    ));
    assert!(err.to_string().contains("assets_missing"));
    assert_eq!(test_result::Model::get_by_grouping_id(&f.db, g.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_report_keeps_raw_output() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", "{\"nope\": true}", None, &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let err = f.pipeline.execute(&job, &no_progress).await.unwrap_err();
    assert!(matches!(err, PipelineError::Parse(_)));

    let results = test_result::Model::get_by_grouping_id(&f.db, g.id).await.unwrap();
    assert_eq!(results[0].completion_status, CompletionStatus::Error);
    assert_eq!(results[0].run_status, RunStatus::Success);
    assert!(results[0].raw_output.contains("nope"));
}

#[tokio::test]
async fn test_harness_crash_is_reported_as_harness_error() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;
    f.write_assets("A1", "", Some(3), &["t1.sh"]);
    f.script(a.id, "t1.sh", 1, false).await;
    let (g, _) = f.grouping(a.id, "g1").await;

    let job = TestRunJob::new(g.id, RunTrigger::Request, Audience::Staff);
    let err = f.pipeline.execute(&job, &no_progress).await.unwrap_err();
    assert!(matches!(err, PipelineError::Harness { exit_code: Some(3), .. }));

    let results = test_result::Model::get_by_grouping_id(&f.db, g.id).await.unwrap();
    assert_eq!(results[0].run_status, RunStatus::Error);
}

#[tokio::test]
async fn test_check_files_requires_assets_and_scripts() {
    let f = fixture(&["A1"]).await;
    let a = f.no_late("A1").await;

    let err = f.pipeline.check_files(&a).await.unwrap_err();
    assert!(err.to_string().contains("assets_missing"));

    f.write_assets("A1", PASSING_REPORT, None, &[]);
    let err = f.pipeline.check_files(&a).await.unwrap_err();
    assert!(err.to_string().contains("scripts_missing"));

    f.script(a.id, "t1.sh", 1, false).await;
    f.pipeline.check_files(&a).await.unwrap();
}
