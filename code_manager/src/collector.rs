//! Submission collection.
//!
//! A collection pass walks every uncollected grouping in id order, a page at a time.
//! Groupings whose collection time has passed get a submission snapshot of the last
//! revision committed before that time, have the assignment's submission rule applied
//! and, when testing is enabled, are tested with every script. One grouping failing
//! only marks that grouping as `error_collecting`; the pass carries on.

use crate::manager::tracker::RunState;
use crate::pipeline::{PipelineError, TestRunJob, TestRunPipeline};
use chrono::{DateTime, Utc};
use code_runner::VcsError;
use db::models::{assignment, grouping, submission};
use sea_orm::{DatabaseConnection, DbErr};
use services::{RuleError, SubmissionRule};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use util::config::CollectionIsolation;

/// Subcommand the worker binary runs a single collection pass under.
pub const COLLECT_SUBCOMMAND: &str = "collect";

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("could not resolve revision: {0}")]
    Revision(#[from] VcsError),

    #[error("collection test run failed: {0}")]
    TestRun(#[from] PipelineError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

pub struct SubmissionCollector {
    pipeline: Arc<TestRunPipeline>,
    batch_size: u64,
}

impl SubmissionCollector {
    pub fn new(pipeline: Arc<TestRunPipeline>, batch_size: u64) -> Self {
        Self {
            pipeline,
            batch_size: batch_size.max(1),
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.pipeline.db()
    }

    /// Collects every grouping due by `now` and returns how many were processed.
    pub async fn collect_all(&self, now: DateTime<Utc>) -> Result<usize, DbErr> {
        let mut rules: HashMap<i64, Option<(assignment::Model, SubmissionRule)>> = HashMap::new();
        let mut after_id = 0;
        let mut processed = 0;

        loop {
            let page = grouping::Model::uncollected_after(self.db(), after_id, self.batch_size).await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;

            for grouping in page {
                if !rules.contains_key(&grouping.assignment_id) {
                    match self.load_rule(grouping.assignment_id).await {
                        Ok(loaded) => {
                            rules.insert(grouping.assignment_id, loaded);
                        }
                        Err(e) => {
                            error!(
                                grouping_id = grouping.id,
                                assignment_id = grouping.assignment_id,
                                error = %e,
                                "failed to load submission rule"
                            );
                            if let Err(e) = self.mark_failed(grouping.id).await {
                                error!(grouping_id = grouping.id, error = %e, "collection bookkeeping failed");
                            }
                            processed += 1;
                            continue;
                        }
                    }
                }
                let Some(Some((assignment, rule))) = rules.get(&grouping.assignment_id) else {
                    if let Err(e) = self.mark_failed(grouping.id).await {
                        error!(grouping_id = grouping.id, error = %e, "collection bookkeeping failed");
                    }
                    processed += 1;
                    continue;
                };

                let due = rule.calculate_collection_time(assignment, &grouping);
                if due > now {
                    debug!(grouping_id = grouping.id, collection_time = %due, "not due yet");
                    continue;
                }

                if let Err(e) = self.collect_one(grouping.id).await {
                    error!(grouping_id = grouping.id, error = %e, "collection bookkeeping failed");
                }
                processed += 1;
            }
        }

        info!(processed, "collection pass finished");
        Ok(processed)
    }

    async fn load_rule(
        &self,
        assignment_id: i64,
    ) -> Result<Option<(assignment::Model, SubmissionRule)>, DbErr> {
        let Some(assignment) = assignment::Model::get_by_id(self.db(), assignment_id).await? else {
            return Ok(None);
        };
        match SubmissionRule::from_assignment(&assignment) {
            Ok(rule) => Ok(Some((assignment, rule))),
            Err(e) => {
                error!(assignment = %assignment.short_identifier, error = %e, "unusable submission rule");
                Ok(None)
            }
        }
    }

    async fn mark_failed(&self, grouping_id: i64) -> Result<(), DbErr> {
        grouping::Model::set_error_collecting(self.db(), grouping_id, true).await?;
        grouping::Model::finish_collection(self.db(), grouping_id).await?;
        Ok(())
    }

    /// Collects one grouping regardless of its collection time.
    ///
    /// Returns the new submission, or `None` when the grouping does not exist or the
    /// attempt failed. Only bookkeeping database errors are returned as errors.
    pub async fn collect_one(&self, grouping_id: i64) -> Result<Option<submission::Model>, DbErr> {
        let Some((grouping, assignment)) =
            grouping::Model::find_with_assignment(self.db(), grouping_id).await?
        else {
            warn!(grouping_id, "grouping to collect not found");
            return Ok(None);
        };

        grouping::Model::set_error_collecting(self.db(), grouping_id, false).await?;

        let collected = match self.snapshot(&grouping, &assignment).await {
            Ok(submission) => Some(submission),
            Err(e) => {
                error!(
                    grouping_id,
                    group = %grouping.group_name,
                    assignment = %assignment.short_identifier,
                    error = %e,
                    "collection failed"
                );
                grouping::Model::set_error_collecting(self.db(), grouping_id, true).await?;
                None
            }
        };

        let grouping = grouping::Model::finish_collection(self.db(), grouping_id).await?;
        info!(
            grouping_id,
            is_collected = grouping.is_collected,
            "grouping collection finished"
        );
        Ok(collected)
    }

    async fn snapshot(
        &self,
        grouping: &grouping::Model,
        assignment: &assignment::Model,
    ) -> Result<submission::Model, CollectError> {
        let rule = SubmissionRule::from_assignment(assignment)?;
        let collection_time = rule.calculate_collection_time(assignment, grouping);

        let revision = self
            .pipeline
            .version_control()
            .revision_at(&grouping.repo_name, collection_time)
            .await?;
        let submission = submission::Model::create_by_timestamp(
            self.db(),
            grouping.id,
            revision.map(|r| (r.identifier, r.timestamp)),
            Utc::now(),
        )
        .await?;

        let effect = rule
            .apply_submission_rule(self.db(), assignment, grouping, &submission)
            .await?;
        debug!(grouping_id = grouping.id, effect = ?effect, "submission rule applied");

        if assignment.enable_test {
            match &submission.revision_identifier {
                Some(revision) => self.test_submission(grouping.id, revision).await?,
                None => info!(grouping_id = grouping.id, "nothing committed, collection run skipped"),
            }
        }

        Ok(submission::Model::current_for_grouping(self.db(), grouping.id)
            .await?
            .unwrap_or(submission))
    }

    /// Runs every script against the collected revision. Only failures that kept the
    /// harness from running count as collection errors.
    async fn test_submission(&self, grouping_id: i64, revision: &str) -> Result<(), PipelineError> {
        let job = TestRunJob::collection(grouping_id, Some(revision.to_string()));
        match self.pipeline.execute(&job, &|_: RunState| {}).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_setup_failure() => Err(e),
            Err(e) => {
                warn!(grouping_id, error = %e, "collection test run produced no result");
                Ok(())
            }
        }
    }
}

/// Where a collection pass runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationStrategy {
    InProcess,
    /// Runs `program collect` and waits for it, so a crash only takes down the child.
    ChildProcess { program: PathBuf },
}

impl IsolationStrategy {
    /// Child processes re-run the current executable.
    pub fn from_config(isolation: CollectionIsolation) -> std::io::Result<Self> {
        Ok(match isolation {
            CollectionIsolation::Inline => IsolationStrategy::InProcess,
            CollectionIsolation::Process => IsolationStrategy::ChildProcess {
                program: std::env::current_exe()?,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectionJobError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("failed to spawn collection process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("collection process exited with {0}")]
    ChildFailed(std::process::ExitStatus),
}

/// A collection pass with its isolation strategy.
pub struct CollectionJob {
    collector: Arc<SubmissionCollector>,
    strategy: IsolationStrategy,
}

impl CollectionJob {
    pub fn new(collector: Arc<SubmissionCollector>, strategy: IsolationStrategy) -> Self {
        Self {
            collector,
            strategy,
        }
    }

    /// Runs one pass. The processed count is only known for in-process passes.
    pub async fn run(&self) -> Result<Option<usize>, CollectionJobError> {
        match &self.strategy {
            IsolationStrategy::InProcess => Ok(Some(self.collector.collect_all(Utc::now()).await?)),
            IsolationStrategy::ChildProcess { program } => {
                let status = Command::new(program)
                    .arg(COLLECT_SUBCOMMAND)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await?;
                if status.success() {
                    Ok(None)
                } else {
                    Err(CollectionJobError::ChildFailed(status))
                }
            }
        }
    }
}
