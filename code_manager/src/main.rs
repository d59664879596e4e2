//main.rs
use chrono::Utc;
use code_manager::collector::{
    CollectionJob, IsolationStrategy, SubmissionCollector, COLLECT_SUBCOMMAND,
};
use code_manager::manager::manager::TestRunScheduler;
use code_manager::manager::tracker::RunState;
use code_manager::pipeline::TestRunPipeline;
use common::logger::init_logging;
use db::models::test_script::RunTrigger;
use db::models::user::UserRole;
use services::RequestContext;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use util::config::AppConfig;

/// Test-run worker.
///
/// - `run` (default): test-run workers plus a collection pass every
///   `COLLECTION_INTERVAL_SECS`, until interrupted.
/// - `collect`: one collection pass, then exit.
/// - `test <grouping_id> [submission|request|collection]`: one staff test run.
#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::global().clone();
    let _log_guard = init_logging(&config.log_file, config.log_to_stdout, &config.log_level);

    let db = match db::connect(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, database = %config.database_path, "failed to connect to database");
            return ExitCode::FAILURE;
        }
    };
    let pipeline = Arc::new(TestRunPipeline::from_config(db, &config));
    let collector = Arc::new(SubmissionCollector::new(
        pipeline.clone(),
        config.collection_batch_size,
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("run") => run(&config, pipeline, collector).await,
        Some(COLLECT_SUBCOMMAND) => match collector.collect_all(Utc::now()).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "collection pass failed");
                ExitCode::FAILURE
            }
        },
        Some("test") => test_once(pipeline, &args[1..]).await,
        Some(other) => {
            eprintln!("Unknown command: {other}. Expected run, collect or test.");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: &AppConfig,
    pipeline: Arc<TestRunPipeline>,
    collector: Arc<SubmissionCollector>,
) -> ExitCode {
    let strategy = match IsolationStrategy::from_config(config.collection_isolation) {
        Ok(strategy) => strategy,
        Err(e) => {
            tracing::error!(error = %e, "cannot locate worker executable for collection");
            return ExitCode::FAILURE;
        }
    };
    let job = CollectionJob::new(collector, strategy);
    let scheduler = TestRunScheduler::start(pipeline, config.test_worker_count);

    let mut ticker = tokio::time::interval(Duration::from_secs(config.collection_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match job.run().await {
                    Ok(processed) => tracing::info!(processed = ?processed, "collection job finished"),
                    Err(e) => tracing::error!(error = %e, "collection job failed"),
                }
                scheduler.tracker().prune_finished();
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    ExitCode::SUCCESS
}

async fn test_once(pipeline: Arc<TestRunPipeline>, args: &[String]) -> ExitCode {
    let Some(grouping_id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        eprintln!("Usage: code_manager test <grouping_id> [submission|request|collection]");
        return ExitCode::FAILURE;
    };
    let trigger = match args.get(1).map(|t| t.parse::<RunTrigger>()) {
        None => RunTrigger::Request,
        Some(Ok(trigger)) => trigger,
        Some(Err(_)) => {
            eprintln!("Unknown trigger: {}", args[1]);
            return ExitCode::FAILURE;
        }
    };

    let scheduler = TestRunScheduler::start(pipeline, 1);
    let ctx = RequestContext::new(0, UserRole::Admin);
    let outcome = match scheduler.request_run(&ctx, grouping_id, trigger).await {
        Ok(run_id) => scheduler.tracker().wait_for(&run_id).await,
        Err(e) => {
            tracing::error!(grouping_id, error = %e, "test run refused");
            eprintln!("{e}");
            None
        }
    };
    scheduler.shutdown().await;

    match outcome {
        Some(state) => {
            println!("{state}");
            if state == RunState::Persisted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => ExitCode::FAILURE,
    }
}
