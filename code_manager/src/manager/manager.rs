// manager/manager.rs
use crate::manager::queue::{spawn_workers, JobQueue, QueueClosed};
use crate::manager::tracker::{RunState, RunTracker};
use crate::pipeline::{PipelineError, TestRunJob, TestRunPipeline};
use code_runner::Audience;
use db::models::grouping;
use db::models::test_script::RunTrigger;
use sea_orm::DbErr;
use services::{Admission, AdmissionError, AdmissionService, RequestContext};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The assignment cannot be tested (missing assets or scripts).
    #[error(transparent)]
    Unavailable(PipelineError),

    #[error("test run scheduler is shut down")]
    ShutDown,

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Accepts test-run requests and executes them on a pool of workers.
///
/// Each worker runs one job through the whole pipeline before taking the next.
/// Every run has its own scratch and run directory, so workers never share files.
pub struct TestRunScheduler {
    pipeline: Arc<TestRunPipeline>,
    queue: Arc<JobQueue<TestRunJob>>,
    tracker: Arc<RunTracker>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TestRunScheduler {
    /// Starts `worker_count` workers (at least one).
    pub fn start(pipeline: Arc<TestRunPipeline>, worker_count: usize) -> Self {
        let queue = Arc::new(JobQueue::new());
        let tracker = Arc::new(RunTracker::new());

        let workers = {
            let pipeline = pipeline.clone();
            let tracker = tracker.clone();
            spawn_workers(queue.clone(), worker_count, move |job: TestRunJob| {
                let pipeline = pipeline.clone();
                let tracker = tracker.clone();
                async move { process(&pipeline, &tracker, job).await }
            })
        };
        info!(workers = worker_count.max(1), "test run scheduler started");

        Self {
            pipeline,
            queue,
            tracker,
            workers: Mutex::new(workers),
        }
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    /// Admits and enqueues a test run of `grouping_id`. Returns the run id.
    ///
    /// Refusals happen here, before anything is queued: an assignment without test
    /// assets or scripts, a student with a run still pending, and every admission
    /// failure. No token is spent on a refused request.
    pub async fn request_run(
        &self,
        ctx: &RequestContext,
        grouping_id: i64,
        trigger: RunTrigger,
    ) -> Result<String, ScheduleError> {
        let db = self.pipeline.db();
        let (_, assignment) = grouping::Model::find_with_assignment(db, grouping_id)
            .await?
            .ok_or(AdmissionError::NotFound(grouping_id))?;

        self.pipeline
            .check_files(&assignment)
            .await
            .map_err(|e| match e {
                PipelineError::Database(db_err) => ScheduleError::Database(db_err),
                other => ScheduleError::Unavailable(other),
            })?;

        let audience = Audience::from(ctx.role);
        let job = TestRunJob::new(grouping_id, trigger, audience);
        let run_id = job.run_id.clone();

        if !self
            .tracker
            .begin(&run_id, grouping_id, audience == Audience::Student)
        {
            return Err(AdmissionError::RunInProgress(grouping_id).into());
        }

        let admission = match AdmissionService::admit(db, ctx, grouping_id).await {
            Ok(admission) => admission,
            Err(e) => {
                self.tracker.advance(&run_id, RunState::Failed(e.to_string()));
                return Err(e.into());
            }
        };
        self.tracker.advance(&run_id, RunState::Admitted);

        if let Err(QueueClosed(job)) = self.queue.push(job).await {
            self.refund(grouping_id, admission).await;
            self.tracker.advance(&job.run_id, RunState::Failed(ScheduleError::ShutDown.to_string()));
            return Err(ScheduleError::ShutDown);
        }
        self.tracker.advance(&run_id, RunState::Queued);

        info!(run_id = %run_id, grouping_id, trigger = %trigger, user_id = ctx.user_id, "test run queued");
        Ok(run_id)
    }

    async fn refund(&self, grouping_id: i64, admission: Admission) {
        if let Err(e) = AdmissionService::release(self.pipeline.db(), grouping_id, admission).await {
            error!(grouping_id, error = %e, "failed to refund test token");
        }
    }

    /// Stops accepting requests and waits for queued runs to finish.
    pub async fn shutdown(&self) {
        self.queue.close().await;
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "test run worker ended abnormally");
            }
        }
        info!("test run scheduler stopped");
    }
}

async fn process(pipeline: &TestRunPipeline, tracker: &RunTracker, job: TestRunJob) {
    let progress = |state: RunState| tracker.advance(&job.run_id, state);
    match pipeline.execute(&job, &progress).await {
        Ok(result) => {
            tracker.advance(&job.run_id, RunState::Persisted);
            info!(run_id = %job.run_id, result_id = result.id, "test run finished");
        }
        Err(e) => tracker.advance(&job.run_id, RunState::Failed(e.to_string())),
    }
}
