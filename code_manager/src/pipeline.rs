//! One test run, end to end: export, stage, invoke, parse, persist.
//!
//! Every run that gets past loading its grouping leaves a `test_results` row behind.
//! Failures before the harness produced a report are stored as diagnostic results
//! carrying the error text.

use crate::manager::tracker::RunState;
use code_runner::{
    Audience, ExportError, GitVersionControl, HarnessInvoker, HarnessOutput, HarnessSettings,
    LocalWorkspace, RepositoryExporter, SandboxStager, ScriptArg, StageRequest, StagingError,
    StagingFailureReason, VersionControl, Workspace,
};
use db::models::test_result::{self, CompletionStatus, NewTestResult, RunStatus};
use db::models::test_script::{self, RunTrigger};
use db::models::{assignment, grouping, submission};
use marker::{JsonTestRunParser, MarkerError, ParsedTestRun, Parser, RunOutcome};
use sea_orm::{DatabaseConnection, DbErr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use util::config::AppConfig;
use util::paths::{assignment_scripts_dir, assignment_tests_dir, resolve_root, run_scratch_dir};
use uuid::Uuid;

const EXPORT_DIR: &str = "export";
const SANDBOX_DIR: &str = "sandbox";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tests_root: PathBuf,
    pub run_root: PathBuf,
    pub harness_path: PathBuf,
    pub harness_interpreter: Option<String>,
    pub harness_timeout: Duration,
    pub verbose_flag: String,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tests_root: resolve_root(&config.automated_tests_root),
            run_root: resolve_root(&config.test_run_root),
            harness_path: resolve_root(&config.test_harness_path),
            harness_interpreter: config.test_harness_interpreter.clone(),
            harness_timeout: Duration::from_secs(config.test_harness_timeout_secs),
            verbose_flag: config.test_harness_verbose_flag.clone(),
        }
    }

    fn harness_settings(&self) -> HarnessSettings {
        HarnessSettings {
            harness_name: self
                .harness_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            interpreter: self.harness_interpreter.clone(),
            timeout: self.harness_timeout,
            verbose_flag: self.verbose_flag.clone(),
            run_root: self.run_root.clone(),
            diagnostics_root: self.tests_root.clone(),
        }
    }
}

/// A queued request to test one grouping.
#[derive(Debug, Clone)]
pub struct TestRunJob {
    pub run_id: String,
    pub grouping_id: i64,
    pub trigger: RunTrigger,
    pub audience: Audience,
    /// Revision to test. The latest one when `None`.
    pub revision: Option<String>,
}

impl TestRunJob {
    pub fn new(grouping_id: i64, trigger: RunTrigger, audience: Audience) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            grouping_id,
            trigger,
            audience,
            revision: None,
        }
    }

    /// A staff-visibility run over every script, pinned to a collected revision.
    pub fn collection(grouping_id: i64, revision: Option<String>) -> Self {
        Self {
            revision,
            ..Self::new(grouping_id, RunTrigger::Collection, Audience::Staff)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("grouping {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("harness failed (exit code {exit_code:?}): {stderr}")]
    Harness { exit_code: Option<i32>, stderr: String },

    #[error("unreadable harness output: {0}")]
    Parse(#[from] MarkerError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl PipelineError {
    /// Export and staging failures mean the run never reached the harness.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, PipelineError::Export(_) | PipelineError::Staging(_))
    }
}

/// Context shared by the stages of one run.
struct RunContext<'a> {
    job: &'a TestRunJob,
    grouping: &'a grouping::Model,
    assignment: &'a assignment::Model,
    submission_id: Option<i64>,
    revision: Option<String>,
}

impl RunContext<'_> {
    fn result_name(&self) -> String {
        format!("{} {} run", self.assignment.short_identifier, self.job.trigger)
    }

    fn diagnostic(&self, raw_error: String) -> NewTestResult {
        NewTestResult {
            submission_id: self.submission_id,
            repo_revision: self.revision.clone(),
            ..NewTestResult::diagnostic(
                self.grouping.id,
                self.job.trigger,
                &self.result_name(),
                raw_error,
            )
        }
    }
}

pub struct TestRunPipeline {
    db: DatabaseConnection,
    settings: PipelineSettings,
    workspace: Arc<dyn Workspace>,
    exporter: RepositoryExporter,
    stager: SandboxStager,
    invoker: HarnessInvoker,
}

impl TestRunPipeline {
    pub fn new(
        db: DatabaseConnection,
        settings: PipelineSettings,
        vcs: Arc<dyn VersionControl>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        Self {
            exporter: RepositoryExporter::new(vcs, workspace.clone()),
            stager: SandboxStager::new(workspace.clone()),
            invoker: HarnessInvoker::new(settings.harness_settings(), workspace.clone()),
            db,
            settings,
            workspace,
        }
    }

    /// Pipeline over git repositories and the local filesystem, configured from `config`.
    pub fn from_config(db: DatabaseConnection, config: &AppConfig) -> Self {
        let vcs = GitVersionControl::new(resolve_root(&config.repositories_root));
        Self::new(
            db,
            PipelineSettings::from_config(config),
            Arc::new(vcs),
            Arc::new(LocalWorkspace),
        )
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn version_control(&self) -> &Arc<dyn VersionControl> {
        self.exporter.version_control()
    }

    pub fn assets_dir(&self, assignment: &assignment::Model) -> PathBuf {
        assignment_tests_dir(&self.settings.tests_root, &assignment.short_identifier)
    }

    /// Request-time check that an assignment can be tested at all: its asset
    /// directory exists and it has at least one test script.
    pub async fn check_files(&self, assignment: &assignment::Model) -> Result<(), PipelineError> {
        self.stager.check_assets(&self.assets_dir(assignment))?;

        if test_script::Model::get_by_assignment_id(&self.db, assignment.id)
            .await?
            .is_empty()
        {
            let scripts_dir =
                assignment_scripts_dir(&self.settings.tests_root, &assignment.short_identifier);
            return Err(StagingError::missing(StagingFailureReason::ScriptsMissing, &scripts_dir).into());
        }
        Ok(())
    }

    /// Runs `job` to completion. `progress` is told about every stage entered.
    pub async fn execute(
        &self,
        job: &TestRunJob,
        progress: &(dyn Fn(RunState) + Send + Sync),
    ) -> Result<test_result::Model, PipelineError> {
        let (grouping, assignment) = grouping::Model::find_with_assignment(&self.db, job.grouping_id)
            .await?
            .ok_or(PipelineError::NotFound(job.grouping_id))?;

        let submission_id = submission::Model::current_for_grouping(&self.db, grouping.id)
            .await?
            .map(|s| s.id);
        let revision = match &job.revision {
            Some(revision) => Some(revision.clone()),
            None => self.latest_revision(&grouping.repo_name).await,
        };

        let ctx = RunContext {
            job,
            grouping: &grouping,
            assignment: &assignment,
            submission_id,
            revision,
        };

        let scratch = run_scratch_dir(&self.settings.run_root, &job.run_id);
        let outcome = self.run_stages(&ctx, &scratch, progress).await;

        if let Err(e) = self.workspace.remove(&scratch) {
            warn!(run_id = %job.run_id, error = %e, "failed to remove scratch directory");
        }

        match outcome {
            Ok(result) => Ok(result),
            Err((e, diagnostic)) => {
                error!(
                    run_id = %job.run_id,
                    grouping_id = grouping.id,
                    assignment = %assignment.short_identifier,
                    error = %e,
                    "test run failed"
                );
                if let Some(diagnostic) = diagnostic {
                    if let Err(db_err) = test_result::Model::create(&self.db, diagnostic).await {
                        error!(run_id = %job.run_id, error = %db_err, "failed to record diagnostic result");
                    }
                }
                Err(e)
            }
        }
    }

    async fn latest_revision(&self, repo_name: &str) -> Option<String> {
        match self.version_control().latest_revision(repo_name).await {
            Ok(revision) => revision.map(|r| r.identifier),
            Err(e) => {
                warn!(repo = repo_name, error = %e, "could not resolve latest revision");
                None
            }
        }
    }

    /// The stages proper. A failure carries the diagnostic result to record for it.
    async fn run_stages(
        &self,
        ctx: &RunContext<'_>,
        scratch: &Path,
        progress: &(dyn Fn(RunState) + Send + Sync),
    ) -> Result<test_result::Model, (PipelineError, Option<NewTestResult>)> {
        let fail = |e: PipelineError| {
            let diagnostic = ctx.diagnostic(e.to_string());
            (e, Some(diagnostic))
        };

        let scripts = test_script::Model::get_by_assignment_id(&self.db, ctx.assignment.id)
            .await
            .map_err(db_failure)?;
        // Students are not told about scripts they cannot see.
        let selected: Vec<_> = test_script::select_for_trigger(scripts.clone(), ctx.job.trigger)
            .into_iter()
            .filter(|s| ctx.job.audience == Audience::Staff || !s.is_private)
            .collect();

        progress(RunState::Exporting);
        let export_dir = self
            .exporter
            .export(
                &ctx.grouping.repo_name,
                ctx.revision.as_deref(),
                &scratch.join(EXPORT_DIR),
            )
            .await
            .map_err(|e| fail(e.into()))?;

        progress(RunState::Staging);
        let assets_dir = self.assets_dir(ctx.assignment);
        let source_dir = export_dir.join(&ctx.assignment.repository_folder);
        let sandbox_dir = scratch.join(SANDBOX_DIR);
        let sandbox = self
            .stager
            .stage(&StageRequest {
                assets_dir: &assets_dir,
                source_dir: &source_dir,
                sandbox_dir: &sandbox_dir,
                harness_path: &self.settings.harness_path,
                scripts: &scripts,
                audience: ctx.job.audience,
            })
            .map_err(|e| fail(e.into()))?;

        progress(RunState::Invoking);
        let args: Vec<ScriptArg> = selected.iter().map(ScriptArg::from).collect();
        let output = self.invoker.run(&ctx.job.run_id, &sandbox, &args).await;

        progress(RunState::Parsing);
        let parsed = match JsonTestRunParser.parse(output.stdout.as_str()) {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.unparsed(ctx, &output, e)),
        };

        let record = self
            .build_result(ctx, &output, &parsed)
            .await
            .map_err(db_failure)?;
        let result = test_result::Model::create(&self.db, record)
            .await
            .map_err(db_failure)?;

        info!(
            run_id = %ctx.job.run_id,
            grouping_id = ctx.grouping.id,
            marks = result.marks_earned,
            status = %result.completion_status,
            "test run persisted"
        );
        Ok(result)
    }

    /// Output the parser rejected. Kept verbatim in a diagnostic result.
    fn unparsed(
        &self,
        ctx: &RunContext<'_>,
        output: &HarnessOutput,
        parse_error: MarkerError,
    ) -> (PipelineError, Option<NewTestResult>) {
        let err = if output.status == RunStatus::Error {
            PipelineError::Harness {
                exit_code: output.exit_code,
                stderr: output.stderr.clone(),
            }
        } else {
            PipelineError::Parse(parse_error)
        };

        let diagnostic = NewTestResult {
            run_status: output.status,
            raw_output: output.stdout.clone(),
            ..ctx.diagnostic(format!("{err}\n{}", output.stderr))
        };
        (err, Some(diagnostic))
    }

    async fn build_result(
        &self,
        ctx: &RunContext<'_>,
        output: &HarnessOutput,
        parsed: &ParsedTestRun,
    ) -> Result<NewTestResult, DbErr> {
        let script = match parsed.first_script_name() {
            Some(name) => test_script::Model::find_by_name(&self.db, ctx.assignment.id, name).await?,
            None => None,
        };
        if script.is_none() {
            warn!(
                run_id = %ctx.job.run_id,
                script = ?parsed.first_script_name(),
                "reported script does not match any test script"
            );
        }

        let summary = CaseSummary::from_run(parsed);
        Ok(NewTestResult {
            grouping_id: ctx.grouping.id,
            test_script_id: script.map(|s| s.id),
            submission_id: ctx.submission_id,
            repo_revision: ctx.revision.clone(),
            name: parsed
                .first_script_name()
                .map(str::to_string)
                .unwrap_or_else(|| ctx.result_name()),
            trigger: ctx.job.trigger,
            completion_status: match parsed.outcome {
                RunOutcome::Pass => CompletionStatus::Pass,
                RunOutcome::Fail => CompletionStatus::Fail,
            },
            run_status: output.status,
            marks_earned: parsed.marks_earned,
            input_description: summary.input,
            expected_output: summary.expected,
            actual_output: summary.actual,
            raw_output: output.stdout.clone(),
            raw_error: output.stderr.clone(),
        })
    }
}

/// Database failures after the run started leave nothing further to record.
fn db_failure(e: DbErr) -> (PipelineError, Option<NewTestResult>) {
    (PipelineError::Database(e), None)
}

/// Per-case fields flattened to one `script/case: value` line each.
#[derive(Default)]
struct CaseSummary {
    input: String,
    expected: String,
    actual: String,
}

impl CaseSummary {
    fn from_run(run: &ParsedTestRun) -> Self {
        let mut summary = Self::default();
        for script in &run.scripts {
            for case in &script.cases {
                let label = format!("{}/{}", script.script_name, case.name);
                push_line(&mut summary.input, &label, &case.input);
                push_line(&mut summary.expected, &label, &case.expected);
                push_line(&mut summary.actual, &label, &case.actual);
            }
        }
        summary
    }
}

fn push_line(target: &mut String, label: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(label);
    target.push_str(": ");
    target.push_str(value);
}
